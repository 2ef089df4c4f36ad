//! SQLite store for discussion sessions.
//!
//! `rusqlite::Connection` is not `Send + Sync`, so the connection lives
//! behind `Arc<Mutex<_>>` and every operation runs on the blocking pool.
//! Multi-row writes use one transaction; saving the same session twice
//! leaves the store unchanged.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use quorum_core::QuorumErr;
use quorum_protocol::SenderType;
use quorum_protocol::Session;
use quorum_protocol::SessionResult;
use quorum_protocol::SessionStatus;
use quorum_protocol::StoredMessage;
use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;
use serde::Serialize;
use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::export::ExportFormat;
use crate::export::export_session;

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the history store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error at {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<StoreError> for QuorumErr {
    fn from(err: StoreError) -> Self {
        QuorumErr::Internal(err.to_string())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_query TEXT NOT NULL,
    task_type TEXT DEFAULT 'general',
    participating_ais TEXT,
    total_rounds INTEGER DEFAULT 0,
    status TEXT DEFAULT 'in_progress',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sender_type TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    round_num INTEGER DEFAULT 0,
    metadata TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS results (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE,
    summary TEXT NOT NULL,
    key_points TEXT,
    consensus_reached INTEGER DEFAULT 0,
    confidence REAL DEFAULT 0.0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_results_session_id ON results(session_id);
"#;

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub total_messages: u64,
    /// Sessions each adapter participated in.
    pub ai_usage: BTreeMap<String, u64>,
}

/// SQLite-backed session history.
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl HistoryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Sqlite {
                path: path.to_path_buf(),
                cause: format!("create dir failed: {e}"),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Sqlite {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::init(conn, path.to_path_buf())
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Sqlite {
            path: path.clone(),
            cause: e.to_string(),
        })?;
        Self::init(conn, path)
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .and_then(|()| conn.execute_batch(SCHEMA))
            .map_err(|e| StoreError::Sqlite {
                path: path.clone(),
                cause: format!("schema init failed: {e}"),
            })?;
        debug!(path = %path.display(), "history store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Sqlite {
            path,
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Save a session with its messages and result in one transaction.
    ///
    /// Idempotent: rows are keyed by their ids and replaced.
    pub async fn save_session(&self, session: &Session) -> Result<String> {
        let session = session.clone();
        let id = session.id.clone();
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| StoreError::Sqlite {
                path: path.clone(),
                cause: format!("transaction start failed: {e}"),
            })?;

            let ais = serde_json::to_string(&session.participating_ais)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT OR REPLACE INTO sessions (
                     id, user_query, task_type, participating_ais,
                     total_rounds, status, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id,
                    session.user_query,
                    session.task_type,
                    ais,
                    session.total_rounds,
                    session.status.as_str(),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| sqlite_err(&path, e))?;

            for (position, message) in session.messages.iter().enumerate() {
                let metadata = serde_json::to_string(&message.metadata)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                tx.execute(
                    "INSERT OR REPLACE INTO messages (
                         id, session_id, sender_type, sender_id,
                         content, round_num, metadata, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        message.id,
                        message.session_id,
                        message.sender_type.as_str(),
                        message.sender_id,
                        message.content,
                        message.round_num,
                        metadata,
                        // Nanosecond suffix keeps ordering stable even
                        // for messages created in the same instant.
                        format!("{}#{position:06}", message.created_at.to_rfc3339()),
                    ],
                )
                .map_err(|e| sqlite_err(&path, e))?;
            }

            if let Some(result) = &session.result {
                let key_points = serde_json::to_string(&result.key_points)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                tx.execute(
                    "INSERT OR REPLACE INTO results (
                         id, session_id, summary, key_points,
                         consensus_reached, confidence, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        result.id,
                        result.session_id,
                        result.summary,
                        key_points,
                        i64::from(result.consensus_reached),
                        result.confidence,
                        result.created_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| sqlite_err(&path, e))?;
            }

            tx.commit().map_err(|e| StoreError::Sqlite {
                path: path.clone(),
                cause: format!("transaction commit failed: {e}"),
            })?;
            Ok(id)
        })
        .await
    }

    /// Load a session with its messages (insertion order) and result.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let mut session = {
                let mut stmt = conn
                    .prepare("SELECT * FROM sessions WHERE id = ?1")
                    .map_err(|e| sqlite_err(&path, e))?;
                let mut rows = stmt
                    .query_map(params![session_id], row_to_session)
                    .map_err(|e| sqlite_err(&path, e))?;
                match rows.next() {
                    Some(row) => row.map_err(|e| sqlite_err(&path, e))?,
                    None => return Ok(None),
                }
            };

            let mut stmt = conn
                .prepare("SELECT * FROM messages WHERE session_id = ?1 ORDER BY created_at")
                .map_err(|e| sqlite_err(&path, e))?;
            let messages = stmt
                .query_map(params![session.id], row_to_message)
                .map_err(|e| sqlite_err(&path, e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| sqlite_err(&path, e))?;
            session.messages = messages;

            let mut stmt = conn
                .prepare("SELECT * FROM results WHERE session_id = ?1")
                .map_err(|e| sqlite_err(&path, e))?;
            let mut rows = stmt
                .query_map(params![session.id], row_to_result)
                .map_err(|e| sqlite_err(&path, e))?;
            if let Some(row) = rows.next() {
                session.result = Some(row.map_err(|e| sqlite_err(&path, e))?);
            }

            Ok(Some(session))
        })
        .await
    }

    /// Most recent sessions, newest first, without messages loaded.
    pub async fn recent(&self, limit: u32, offset: u32) -> Result<Vec<Session>> {
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM sessions ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )
                .map_err(|e| sqlite_err(&path, e))?;
            let sessions = stmt
                .query_map(params![limit, offset], row_to_session)
                .map_err(|e| sqlite_err(&path, e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| sqlite_err(&path, e))?;
            Ok(sessions)
        })
        .await
    }

    /// Search sessions by substring over the query, message contents
    /// and result summaries.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<Session>> {
        let pattern = format!("%{query}%");
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT s.* FROM sessions s
                     LEFT JOIN messages m ON s.id = m.session_id
                     LEFT JOIN results r ON s.id = r.session_id
                     WHERE s.user_query LIKE ?1
                        OR m.content LIKE ?1
                        OR r.summary LIKE ?1
                     ORDER BY s.created_at DESC
                     LIMIT ?2",
                )
                .map_err(|e| sqlite_err(&path, e))?;
            let sessions = stmt
                .query_map(params![pattern, limit], row_to_session)
                .map_err(|e| sqlite_err(&path, e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| sqlite_err(&path, e))?;
            Ok(sessions)
        })
        .await
    }

    /// Delete a session; messages and result cascade.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
                .map_err(|e| sqlite_err(&path, e))?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        let path = self.path.clone();
        self.with_conn(move |conn| {
            let total_sessions: u64 = conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                .map_err(|e| sqlite_err(&path, e))?;
            let completed_sessions: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sessions WHERE status = ?1",
                    params![SessionStatus::Completed.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| sqlite_err(&path, e))?;
            let total_messages: u64 = conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(|e| sqlite_err(&path, e))?;

            let mut ai_usage: BTreeMap<String, u64> = BTreeMap::new();
            let mut stmt = conn
                .prepare("SELECT participating_ais FROM sessions")
                .map_err(|e| sqlite_err(&path, e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, Option<String>>(0))
                .map_err(|e| sqlite_err(&path, e))?;
            for row in rows {
                let raw = row.map_err(|e| sqlite_err(&path, e))?.unwrap_or_default();
                let ais: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
                for ai in ais {
                    *ai_usage.entry(ai).or_insert(0) += 1;
                }
            }

            Ok(StoreStats {
                total_sessions,
                completed_sessions,
                total_messages,
                ai_usage,
            })
        })
        .await
    }

    /// Export a session in the given format, or `None` when missing.
    pub async fn export(&self, session_id: &str, format: ExportFormat) -> Result<Option<String>> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        export_session(&session, format)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl quorum_core::SessionSink for HistoryStore {
    async fn save(&self, session: &Session) -> quorum_core::Result<()> {
        self.save_session(session).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("path", &self.path)
            .finish()
    }
}

fn sqlite_err(path: &Path, err: rusqlite::Error) -> StoreError {
    StoreError::Sqlite {
        path: path.to_path_buf(),
        cause: err.to_string(),
    }
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    // Message timestamps may carry an ordering suffix after '#'.
    let raw = raw.split('#').next().unwrap_or(raw);
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_session(row: &Row<'_>) -> std::result::Result<Session, rusqlite::Error> {
    let ais_raw: Option<String> = row.get("participating_ais")?;
    let status_raw: String = row.get("status")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    Ok(Session {
        id: row.get("id")?,
        user_query: row.get("user_query")?,
        task_type: row.get("task_type")?,
        participating_ais: serde_json::from_str(&ais_raw.unwrap_or_default())
            .unwrap_or_default(),
        total_rounds: row.get("total_rounds")?,
        status: SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::InProgress),
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
        messages: Vec::new(),
        result: None,
    })
}

fn row_to_message(row: &Row<'_>) -> std::result::Result<StoredMessage, rusqlite::Error> {
    let sender_raw: String = row.get("sender_type")?;
    let metadata_raw: Option<String> = row.get("metadata")?;
    let created_raw: String = row.get("created_at")?;
    Ok(StoredMessage {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        sender_type: SenderType::parse(&sender_raw).unwrap_or(SenderType::System),
        sender_id: row.get("sender_id")?,
        content: row.get("content")?,
        round_num: row.get("round_num")?,
        metadata: serde_json::from_str(&metadata_raw.unwrap_or_default()).unwrap_or_default(),
        created_at: parse_timestamp(&created_raw)?,
    })
}

fn row_to_result(row: &Row<'_>) -> std::result::Result<SessionResult, rusqlite::Error> {
    let key_points_raw: Option<String> = row.get("key_points")?;
    let consensus: i64 = row.get("consensus_reached")?;
    let created_raw: String = row.get("created_at")?;
    Ok(SessionResult {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        summary: row.get("summary")?,
        key_points: serde_json::from_str(&key_points_raw.unwrap_or_default())
            .unwrap_or_default(),
        consensus_reached: consensus != 0,
        confidence: row.get("confidence")?,
        created_at: parse_timestamp(&created_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use quorum_protocol::SenderType;

    use super::*;

    fn sample_session() -> Session {
        let mut session = Session::create(
            "which cache should we use",
            "analysis",
            vec!["Claude".to_string(), "Gemini".to_string()],
        );
        session.add_message(SenderType::User, "user", "which cache should we use", 0);
        session.add_message(SenderType::Ai, "Claude", "I recommend an LRU cache", 1);
        session.add_message(SenderType::Ai, "Gemini", "agree, LRU with a TTL", 1);
        session.total_rounds = 1;
        session.set_result(
            "LRU with TTL",
            vec!["bounded memory".to_string()],
            true,
            0.9,
        );
        session
    }

    #[tokio::test]
    async fn save_then_get_round_trips_everything() {
        let store = HistoryStore::open_in_memory().expect("open");
        let session = sample_session();
        store.save_session(&session).await.expect("save");

        let loaded = store
            .get_session(&session.id)
            .await
            .expect("get")
            .expect("present");

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.user_query, session.user_query);
        assert_eq!(loaded.task_type, session.task_type);
        assert_eq!(loaded.participating_ais, session.participating_ais);
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.messages.len(), 3);
        for (a, b) in loaded.messages.iter().zip(session.messages.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.sender_id, b.sender_id);
            assert_eq!(a.content, b.content);
            assert_eq!(a.round_num, b.round_num);
        }
        let result = loaded.result.expect("result");
        let original = session.result.expect("result");
        assert_eq!(result.id, original.id);
        assert_eq!(result.summary, original.summary);
        assert_eq!(result.key_points, original.key_points);
        assert_eq!(result.consensus_reached, original.consensus_reached);
        assert_eq!(result.confidence, original.confidence);
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let store = HistoryStore::open_in_memory().expect("open");
        let mut session = Session::create("q", "general", vec![]);
        for i in 0..10 {
            session.add_message(SenderType::Ai, "Claude", format!("message {i}"), 1);
        }
        store.save_session(&session).await.expect("save");
        let loaded = store
            .get_session(&session.id)
            .await
            .expect("get")
            .expect("present");
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent() {
        let store = HistoryStore::open_in_memory().expect("open");
        let session = sample_session();
        store.save_session(&session).await.expect("first save");
        store.save_session(&session).await.expect("second save");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_messages, 3);
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let store = HistoryStore::open_in_memory().expect("open");
        assert!(store.get_session("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let store = HistoryStore::open_in_memory().expect("open");
        let session = sample_session();
        store.save_session(&session).await.expect("save");

        assert!(store.delete_session(&session.id).await.expect("delete"));
        assert!(!store.delete_session(&session.id).await.expect("redelete"));

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.total_messages, 0);
    }

    #[tokio::test]
    async fn recent_orders_newest_first() {
        let store = HistoryStore::open_in_memory().expect("open");
        let mut first = Session::create("first question", "general", vec![]);
        first.created_at = first.created_at - chrono::Duration::seconds(60);
        let second = Session::create("second question", "general", vec![]);
        store.save_session(&first).await.expect("save");
        store.save_session(&second).await.expect("save");

        let recent = store.recent(10, 0).await.expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_query, "second question");

        let offset = store.recent(10, 1).await.expect("recent offset");
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].user_query, "first question");
    }

    #[tokio::test]
    async fn search_matches_query_content_and_summary() {
        let store = HistoryStore::open_in_memory().expect("open");
        let session = sample_session();
        store.save_session(&session).await.expect("save");
        let other = Session::create("unrelated topic", "general", vec![]);
        store.save_session(&other).await.expect("save");

        let by_query = store.search("cache", 10).await.expect("search");
        assert_eq!(by_query.len(), 1);
        assert_eq!(by_query[0].id, session.id);

        let by_content = store.search("TTL", 10).await.expect("search");
        assert_eq!(by_content.len(), 1);

        let none = store.search("kubernetes", 10).await.expect("search");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn stats_count_adapter_usage() {
        let store = HistoryStore::open_in_memory().expect("open");
        store
            .save_session(&sample_session())
            .await
            .expect("save one");
        store
            .save_session(&sample_session())
            .await
            .expect("save two");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.completed_sessions, 2);
        assert_eq!(stats.ai_usage.get("Claude"), Some(&2));
        assert_eq!(stats.ai_usage.get("Gemini"), Some(&2));
    }

    #[tokio::test]
    async fn opens_on_disk_and_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("history.db");
        let session = sample_session();
        {
            let store = HistoryStore::open(&db_path).expect("open");
            store.save_session(&session).await.expect("save");
        }
        let store = HistoryStore::open(&db_path).expect("reopen");
        let loaded = store
            .get_session(&session.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.user_query, session.user_query);
        assert_eq!(loaded.messages.len(), 3);
    }
}
