//! Coordinator → history store integration.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use quorum_core::Coordinator;
use quorum_core::DiscussionConfig;
use quorum_core::Result;
use quorum_core::adapters::Adapter;
use quorum_core::adapters::ChunkStream;
use quorum_protocol::AdapterConfig;
use quorum_protocol::Event;
use quorum_protocol::SenderType;
use quorum_protocol::SessionStatus;
use quorum_state::ExportFormat;
use quorum_state::HistoryStore;

struct ScriptedAdapter {
    name: String,
    responses: Mutex<Vec<String>>,
    delay: Duration,
    config: AdapterConfig,
}

impl ScriptedAdapter {
    fn boxed(name: &str, responses: &[&str]) -> Arc<dyn Adapter> {
        Self::boxed_with_delay(name, responses, Duration::ZERO)
    }

    fn boxed_with_delay(name: &str, responses: &[&str], delay: Duration) -> Arc<dyn Adapter> {
        Arc::new(Self {
            name: name.to_string(),
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            delay,
            config: AdapterConfig::default().with_max_retries(0),
        })
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }
    fn config(&self) -> &AdapterConfig {
        &self.config
    }
    async fn check_availability(&self) -> bool {
        true
    }
    async fn send(&self, _prompt: &str) -> Result<ChunkStream> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut responses = self.responses.lock().expect("lock");
        let text = if responses.is_empty() {
            "nothing further".to_string()
        } else {
            responses.remove(0)
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
    }
}

fn store() -> Arc<HistoryStore> {
    Arc::new(HistoryStore::open_in_memory().expect("open store"))
}

#[tokio::test]
async fn completed_discussion_is_persisted_with_messages_and_result() {
    let store = store();
    let adapters = vec![
        ScriptedAdapter::boxed("claude", &["claude round one", "claude round two"]),
        ScriptedAdapter::boxed("gemini", &["gemini round one", "gemini round two"]),
    ];
    let coordinator = Coordinator::new(adapters)
        .with_discussion_config(DiscussionConfig {
            max_rounds: 2,
            ..DiscussionConfig::default()
        })
        .with_session_sink(store.clone());

    let events: Vec<Event> = coordinator
        .process(
            "analyze and compare these storage engines for the analytics workload",
            None,
        )
        .expect("valid input")
        .collect()
        .await;
    assert!(events.last().expect("terminal").is_terminal());

    let sessions = store.recent(10, 0).await.expect("recent");
    assert_eq!(sessions.len(), 1);
    let session = store
        .get_session(&sessions[0].id)
        .await
        .expect("get")
        .expect("present");

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.task_type, "analysis");
    assert_eq!(
        session.participating_ais,
        vec!["claude".to_string(), "gemini".to_string()]
    );
    assert_eq!(session.total_rounds, 2);

    // One user message plus four adapter turns, in order.
    assert_eq!(session.messages.len(), 5);
    assert_eq!(session.messages[0].sender_type, SenderType::User);
    let senders: Vec<&str> = session.messages[1..]
        .iter()
        .map(|m| m.sender_id.as_str())
        .collect();
    assert_eq!(senders, vec!["claude", "gemini", "claude", "gemini"]);

    let result = session.result.as_ref().expect("result");
    assert!(!result.summary.is_empty());

    // Markdown export reflects the stored conversation.
    let markdown = store
        .export(&session.id, ExportFormat::Markdown)
        .await
        .expect("export")
        .expect("present");
    assert!(markdown.contains(&session.user_query));
    assert!(markdown.contains("**CLAUDE:** claude round one"));
    assert!(markdown.contains(&result.summary));
}

#[tokio::test]
async fn fast_path_sessions_are_persisted_as_completed() {
    let store = store();
    let adapters = vec![ScriptedAdapter::boxed("claude", &["hello there"])];
    let coordinator = Coordinator::new(adapters).with_session_sink(store.clone());

    let _events: Vec<Event> = coordinator
        .process("hi", None)
        .expect("valid input")
        .collect()
        .await;

    let sessions = store.recent(10, 0).await.expect("recent");
    assert_eq!(sessions.len(), 1);
    let session = store
        .get_session(&sessions[0].id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_rounds, 1);
    assert_eq!(session.messages.len(), 2);
    assert!(session.result.expect("result").consensus_reached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_stream_marks_the_session_cancelled() {
    let store = store();
    // The second turn stalls long enough for the consumer to walk away.
    let adapters = vec![
        ScriptedAdapter::boxed("claude", &["first answer", "second answer"]),
        ScriptedAdapter::boxed_with_delay(
            "gemini",
            &["slow answer", "slow answer"],
            Duration::from_secs(30),
        ),
    ];
    let coordinator = Coordinator::new(adapters).with_session_sink(store.clone());

    {
        let stream = coordinator
            .process(
                "analyze and compare these storage engines for the analytics workload",
                None,
            )
            .expect("valid input");
        futures::pin_mut!(stream);
        // Consume until claude has finished, then cancel.
        while let Some(event) = stream.next().await {
            if matches!(event, Event::AdapterEnd { ref adapter_name, .. } if adapter_name == "claude")
            {
                break;
            }
        }
    }

    // The cancellation flush runs on a spawned task.
    let mut status = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sessions = store.recent(10, 0).await.expect("recent");
        if let Some(session) = sessions.first() {
            status = Some(session.status);
            break;
        }
    }
    assert_eq!(status, Some(SessionStatus::Cancelled));
}

#[tokio::test]
async fn json_export_of_a_stored_session_round_trips() {
    let store = store();
    let adapters = vec![ScriptedAdapter::boxed("claude", &["the answer"])];
    let coordinator = Coordinator::new(adapters).with_session_sink(store.clone());
    let _events: Vec<Event> = coordinator
        .process("hi", None)
        .expect("valid input")
        .collect()
        .await;

    let sessions = store.recent(1, 0).await.expect("recent");
    let id = &sessions[0].id;
    let json = store
        .export(id, ExportFormat::Json)
        .await
        .expect("export")
        .expect("present");
    let imported = quorum_state::import_json(&json).expect("import");
    let stored = store
        .get_session(id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(imported.id, stored.id);
    assert_eq!(imported.messages, stored.messages);
    assert_eq!(imported.result, stored.result);
}
