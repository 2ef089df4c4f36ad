//! Persisted session model.
//!
//! A [`Session`] is the durable shadow of one end-to-end request. It owns
//! its messages and its result; children refer back to the session by id
//! only, and deletion cascades in the store.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<SessionStatus> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }
}

/// Who produced a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Ai,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Ai => "ai",
            SenderType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<SenderType> {
        match s {
            "user" => Some(SenderType::User),
            "ai" => Some(SenderType::Ai),
            "system" => Some(SenderType::System),
            _ => None,
        }
    }
}

/// One message in a persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    /// Id reference to the owning session, never a pointer.
    pub session_id: String,
    pub sender_type: SenderType,
    /// Adapter name, `"user"`, or `"system"`.
    pub sender_id: String,
    pub content: String,
    pub round_num: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Create a message with a fresh id and the current timestamp.
    pub fn create(
        session_id: impl Into<String>,
        sender_type: SenderType,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        round_num: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            sender_type,
            sender_id: sender_id.into(),
            content: content.into(),
            round_num,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }
}

/// Final result owned by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub id: String,
    pub session_id: String,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub consensus_reached: bool,
    #[serde(default)]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl SessionResult {
    pub fn create(
        session_id: impl Into<String>,
        summary: impl Into<String>,
        key_points: Vec<String>,
        consensus_reached: bool,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            summary: summary.into(),
            key_points,
            consensus_reached,
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// A persisted discussion session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_query: String,
    /// Stable task-kind string (see [`TaskType::as_str`](crate::TaskType)).
    pub task_type: String,
    /// Participating adapter names in speaking order.
    pub participating_ais: Vec<String>,
    pub total_rounds: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResult>,
}

impl Session {
    /// Create a new in-progress session with a fresh id.
    pub fn create(
        user_query: impl Into<String>,
        task_type: impl Into<String>,
        participating_ais: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_query: user_query.into(),
            task_type: task_type.into(),
            participating_ais,
            total_rounds: 0,
            status: SessionStatus::InProgress,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            result: None,
        }
    }

    /// Append a message, refreshing `updated_at`.
    #[allow(clippy::unwrap_used)]
    pub fn add_message(
        &mut self,
        sender_type: SenderType,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        round_num: u32,
    ) -> &StoredMessage {
        let message =
            StoredMessage::create(self.id.clone(), sender_type, sender_id, content, round_num);
        self.messages.push(message);
        self.updated_at = Utc::now();
        self.messages.last().unwrap()
    }

    /// Attach the final result and mark the session completed.
    pub fn set_result(
        &mut self,
        summary: impl Into<String>,
        key_points: Vec<String>,
        consensus_reached: bool,
        confidence: f64,
    ) {
        self.result = Some(SessionResult::create(
            self.id.clone(),
            summary,
            key_points,
            consensus_reached,
            confidence,
        ));
        self.status = SessionStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Mark the session errored, recording the message as a system entry.
    pub fn mark_error(&mut self, error_message: &str) {
        self.status = SessionStatus::Error;
        self.updated_at = Utc::now();
        if !error_message.is_empty() {
            self.add_message(
                SenderType::System,
                "system",
                format!("Error: {error_message}"),
                0,
            );
        }
    }

    /// Mark the session cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = SessionStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Brief one-line description for listings.
    pub fn summary_text(&self) -> String {
        let preview: String = if self.user_query.chars().count() > 50 {
            let head: String = self.user_query.chars().take(50).collect();
            format!("{head}...")
        } else {
            self.user_query.clone()
        };
        format!(
            "{preview} ({} AIs, {} rounds)",
            self.participating_ais.len(),
            self.total_rounds
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn new_session_starts_in_progress() {
        let session = Session::create("q", "general", vec!["claude".to_string()]);
        assert_eq!(session.status, SessionStatus::InProgress);
        assert!(session.messages.is_empty());
        assert!(session.result.is_none());
    }

    #[test]
    fn messages_carry_the_session_id() {
        let mut session = Session::create("q", "general", vec![]);
        session.add_message(SenderType::Ai, "claude", "hello", 1);
        assert_eq!(session.messages[0].session_id, session.id);
        assert_eq!(session.messages[0].round_num, 1);
    }

    #[test]
    fn set_result_completes_the_session() {
        let mut session = Session::create("q", "general", vec![]);
        session.set_result("done", vec!["point".to_string()], true, 0.8);
        assert_eq!(session.status, SessionStatus::Completed);
        let result = session.result.expect("result");
        assert_eq!(result.session_id, session.id);
        assert!(result.consensus_reached);
    }

    #[test]
    fn mark_error_appends_system_message() {
        let mut session = Session::create("q", "general", vec![]);
        session.mark_error("boom");
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].sender_type, SenderType::System);
        assert_eq!(session.messages[0].content, "Error: boom");
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Error,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }
}
