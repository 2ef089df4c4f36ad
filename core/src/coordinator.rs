//! Top-level request orchestration.
//!
//! The coordinator is the sole emitter of externally observable events.
//! It analyzes the input, takes the fast path for trivial prompts,
//! otherwise selects adapters, drives the discussion round by round,
//! checks for conflicts after every round from the second onward, gates
//! close races on the user, synthesizes the result, and commits the
//! session. Dropping the event stream cancels in-flight work and marks
//! the session cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use quorum_protocol::Conflict;
use quorum_protocol::Event;
use quorum_protocol::ImportanceLevel;
use quorum_protocol::Resolution;
use quorum_protocol::ResolutionKind;
use quorum_protocol::SenderType;
use quorum_protocol::Session;
use quorum_protocol::SessionStatus;
use quorum_protocol::SynthesisResult;
use quorum_protocol::Task;
use quorum_protocol::TaskType;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::adapters;
use crate::adapters::Adapter;
use crate::analyzer;
use crate::approval::ApprovalCallback;
use crate::approval::ApprovalEngine;
use crate::availability::AvailabilityCache;
use crate::breaker::BreakerRegistry;
use crate::conflict::ConflictResolver;
use crate::context::SharedContext;
use crate::discussion::DiscussionConfig;
use crate::discussion::DiscussionEvent;
use crate::discussion::DiscussionManager;
use crate::error::QuorumErr;
use crate::error::Result;
use crate::selector::Selector;
use crate::synthesizer::Synthesizer;

/// Async callback asking the user to arbitrate a close-race conflict.
///
/// The returned choice is one of the resolution's top positions, the
/// literal `"more"` to continue discussing, or free-form text (four or
/// more characters) taken as a new position.
pub type ConflictCallback =
    Arc<dyn Fn(Conflict, Resolution) -> BoxFuture<'static, String> + Send + Sync>;

/// Destination for completed (or aborted) sessions.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn save(&self, session: &Session) -> Result<()>;
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Aggregate deadline for the availability fan-out, in seconds.
    #[serde(default = "default_parallel_check_timeout")]
    pub parallel_check_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_conflict_detection: bool,
    #[serde(default = "default_true")]
    pub enable_approval: bool,
    /// Context token budget handed to each request's shared context.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "default_max_history_per_ai")]
    pub max_history_per_ai: u32,
}

fn default_parallel_check_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_max_context_tokens() -> u32 {
    8000
}
fn default_max_history_per_ai() -> u32 {
    5
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            parallel_check_timeout_secs: default_parallel_check_timeout(),
            enable_conflict_detection: default_true(),
            enable_approval: default_true(),
            max_context_tokens: default_max_context_tokens(),
            max_history_per_ai: default_max_history_per_ai(),
        }
    }
}

/// Commits the session exactly once; an un-committed drop means the
/// consumer cancelled, and the session is flushed as CANCELLED from a
/// spawned task.
struct SessionGuard {
    sink: Option<Arc<dyn SessionSink>>,
    session: Option<Session>,
    finished: bool,
}

impl SessionGuard {
    fn new(sink: Option<Arc<dyn SessionSink>>) -> Self {
        Self {
            sink,
            session: None,
            finished: false,
        }
    }

    fn arm(&mut self, session: Session) {
        self.session = Some(session);
    }

    fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    async fn commit(&mut self) {
        self.finished = true;
        if let (Some(sink), Some(session)) = (&self.sink, &self.session)
            && let Err(err) = sink.save(session).await
        {
            error!(session_id = %session.id, %err, "failed to persist session");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let (Some(sink), Some(mut session)) = (self.sink.take(), self.session.take()) else {
            return;
        };
        session.mark_cancelled();
        warn!(session_id = %session.id, "request cancelled, flushing session");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = sink.save(&session).await;
            });
        }
    }
}

/// Orchestrates one user request into an event stream.
pub struct Coordinator {
    config: CoordinatorConfig,
    discussion_config: DiscussionConfig,
    selector: Selector,
    synthesizer: Synthesizer,
    approval: ApprovalEngine,
    adapters: Vec<Arc<dyn Adapter>>,
    availability: Arc<AvailabilityCache>,
    breakers: Arc<BreakerRegistry>,
    sink: Option<Arc<dyn SessionSink>>,
    conflict_callback: Option<ConflictCallback>,
}

impl Coordinator {
    /// A coordinator over the given adapter set with default tuning.
    pub fn new(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self {
            config: CoordinatorConfig::default(),
            discussion_config: DiscussionConfig::default(),
            selector: Selector::default(),
            synthesizer: Synthesizer::default(),
            approval: ApprovalEngine::default(),
            adapters,
            availability: Arc::new(AvailabilityCache::default()),
            breakers: Arc::new(BreakerRegistry::default()),
            sink: None,
            conflict_callback: None,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_discussion_config(mut self, config: DiscussionConfig) -> Self {
        self.discussion_config = config;
        self
    }

    /// Share an availability cache (and its TTL) across coordinators.
    pub fn with_availability_cache(mut self, cache: Arc<AvailabilityCache>) -> Self {
        self.availability = cache;
        self
    }

    /// Share breaker state across coordinators.
    pub fn with_breaker_registry(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Persist sessions to `sink` when requests terminate.
    pub fn with_session_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_conflict_callback(mut self, callback: ConflictCallback) -> Self {
        self.conflict_callback = Some(callback);
        self
    }

    pub fn with_approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval.set_callback(callback);
        self
    }

    pub fn availability_cache(&self) -> &Arc<AvailabilityCache> {
        &self.availability
    }

    /// Process one user input into a typed event stream.
    ///
    /// `adapters` overrides the coordinator's pool and is treated as
    /// already availability-filtered. Validation failures are returned
    /// here, before any stream exists.
    pub fn process<'a>(
        &'a self,
        user_input: &str,
        adapters: Option<Vec<Arc<dyn Adapter>>>,
    ) -> Result<impl Stream<Item = Event> + 'a> {
        if user_input.trim().is_empty() {
            return Err(QuorumErr::Validation("empty prompt".into()));
        }
        let input = user_input.to_string();

        Ok(async_stream::stream! {
            let task = analyzer::analyze(&input);
            let mut guard = SessionGuard::new(self.sink.clone());

            let available = match adapters {
                Some(list) => list,
                None => {
                    adapters::check_adapters_parallel(
                        &self.adapters,
                        &self.availability,
                        Duration::from_secs(self.config.parallel_check_timeout_secs),
                    )
                    .await
                }
            };

            if task.task_type == TaskType::SimpleChat || task.complexity < 0.3 {
                {
                    let fast = self.fast_path(&input, &task, available, &mut guard);
                    futures::pin_mut!(fast);
                    while let Some(event) = fast.next().await {
                        yield event;
                    }
                }
                guard.commit().await;
                return;
            }

            yield Event::TaskAnalyzed { task: task.clone() };

            let selected = self.selector.select(&task, &available);
            if selected.is_empty() {
                yield Event::AdaptersSelected {
                    adapters: Vec::new(),
                    explanation: "No AI adapters available for this task.".to_string(),
                };
                let mut session = Session::create(&input, task.task_type.as_str(), Vec::new());
                session.status = SessionStatus::Completed;
                guard.arm(session);
                guard.commit().await;
                return;
            }

            let names: Vec<String> = selected
                .iter()
                .map(|a| a.display_name().to_string())
                .collect();
            yield Event::AdaptersSelected {
                adapters: selected.iter().map(|a| adapters::info(a.as_ref())).collect(),
                explanation: self.selector.explanation(&task, &selected),
            };

            let mut session = Session::create(&input, task.task_type.as_str(), names);
            session.add_message(SenderType::User, "user", &input, 0);
            guard.arm(session);

            let mut context = SharedContext::with_limits(
                &input,
                self.config.max_context_tokens,
                self.config.max_history_per_ai,
            );
            let resolver = ConflictResolver::new(task.task_type);
            let mut manager = DiscussionManager::new(self.discussion_config.clone());
            let max_rounds = manager.round_budget(&task);
            let mut last_resolution: Option<Resolution> = None;

            for round_num in 1..=max_rounds {
                {
                    let round = manager.run_round(
                        round_num,
                        max_rounds,
                        &selected,
                        &mut context,
                        &self.breakers,
                    );
                    futures::pin_mut!(round);
                    while let Some(event) = round.next().await {
                        if let Some(event) = remap(event) {
                            yield event;
                        }
                    }
                }

                if round_num >= 2
                    && self.config.enable_conflict_detection
                    && let Some(conflict) = resolver.detect_conflict(&context)
                {
                    let resolution = resolver.resolve(&conflict);
                    info!(
                        topic = %conflict.topic,
                        severity = %conflict.severity,
                        kind = resolution.kind.as_str(),
                        "conflict detected"
                    );
                    yield Event::ConflictDetected {
                        conflict: conflict.clone(),
                        resolution: resolution.clone(),
                    };

                    if resolution.kind == ResolutionKind::UserDecision
                        && let Some(callback) = &self.conflict_callback
                    {
                        let choice =
                            callback(conflict.clone(), resolution.clone()).await;
                        if !choice.is_empty() && choice != "more" {
                            context.add_key_point(&format!("User chose: {choice}"));
                        }
                        yield Event::ConflictResolved {
                            conflict,
                            resolution: resolution.clone(),
                            user_choice: Some(choice),
                        };
                    }
                    last_resolution = Some(resolution);
                }

                if manager.state.consensus_reached {
                    break;
                }
            }

            if self.config.enable_approval {
                let final_round = context.current_round();
                let responses: Vec<String> = context
                    .messages_for_round(final_round)
                    .map(|m| m.content.clone())
                    .collect();
                for response in responses {
                    for action in self.approval.extract_actions(&response) {
                        let importance = self.approval.calculate_importance(&action);
                        if importance == ImportanceLevel::Low && self.approval.auto_approve_low {
                            continue;
                        }
                        yield Event::ApprovalRequested {
                            action: action.clone(),
                            importance,
                        };
                        let (_, outcome) = self.approval.request_approval(action).await;
                        yield Event::ApprovalResult { result: outcome };
                    }
                }
            }

            let mut result = self.synthesizer.synthesize(&context);
            if let Some(resolution) = &last_resolution {
                result.confidence = resolution.confidence;
            }

            if let Some(session) = guard.session_mut() {
                for message in context.messages() {
                    session.add_message(
                        SenderType::Ai,
                        message.sender.clone(),
                        message.content.clone(),
                        message.round,
                    );
                }
                session.total_rounds = context.current_round();
                session.set_result(
                    result.summary.clone(),
                    result.key_points.clone(),
                    result.consensus_reached,
                    result.confidence,
                );
            }

            yield Event::Result {
                result,
                context: context.summary(),
            };
            guard.commit().await;
        })
    }

    /// Trivial inputs: one adapter, no analysis event, minimal
    /// synthesis.
    fn fast_path<'a>(
        &'a self,
        input: &'a str,
        task: &'a Task,
        available: Vec<Arc<dyn Adapter>>,
        guard: &'a mut SessionGuard,
    ) -> impl Stream<Item = Event> + 'a {
        async_stream::stream! {
            debug!(task_type = %task.task_type, "taking the fast path");
            let Some(adapter) = available.into_iter().next() else {
                yield Event::AdaptersSelected {
                    adapters: Vec::new(),
                    explanation: "No AI adapters available.".to_string(),
                };
                let mut session = Session::create(input, task.task_type.as_str(), Vec::new());
                session.status = SessionStatus::Completed;
                guard.arm(session);
                return;
            };

            let display_name = adapter.display_name().to_string();
            yield Event::AdaptersSelected {
                adapters: vec![adapters::info(adapter.as_ref())],
                explanation: format!("Quick response from {display_name}"),
            };

            let mut session =
                Session::create(input, task.task_type.as_str(), vec![display_name.clone()]);
            session.add_message(SenderType::User, "user", input, 0);
            guard.arm(session);

            yield Event::AdapterStart {
                adapter_name: display_name.clone(),
                icon: adapter.icon().to_string(),
                color: adapter.color().to_string(),
            };

            let mut full_response = String::new();
            match adapter.send(input).await {
                Ok(mut chunks) => {
                    while let Some(item) = chunks.next().await {
                        match item {
                            Ok(chunk) => {
                                full_response.push_str(&chunk);
                                yield Event::AdapterChunk {
                                    adapter_name: display_name.clone(),
                                    chunk,
                                };
                            }
                            Err(err) => {
                                yield Event::AdapterError {
                                    adapter_name: display_name.clone(),
                                    message: err.to_string(),
                                };
                                if let Some(session) = guard.session_mut() {
                                    session.mark_error(&err.to_string());
                                }
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    yield Event::AdapterError {
                        adapter_name: display_name.clone(),
                        message: err.to_string(),
                    };
                    if let Some(session) = guard.session_mut() {
                        session.mark_error(&err.to_string());
                    }
                    return;
                }
            }

            yield Event::AdapterEnd {
                adapter_name: display_name.clone(),
                full_response: full_response.clone(),
            };

            let summary = if full_response.chars().count() > 200 {
                let head: String = full_response.chars().take(200).collect();
                format!("{head}...")
            } else {
                full_response.clone()
            };

            let mut context = SharedContext::new(input);
            context.append(&display_name, &full_response, 1);
            context.consensus_reached = true;

            if let Some(session) = guard.session_mut() {
                session.add_message(SenderType::Ai, display_name.clone(), &full_response, 1);
                session.total_rounds = 1;
                session.set_result(summary.clone(), Vec::new(), true, 0.0);
            }

            let result = SynthesisResult {
                summary,
                key_points: Vec::new(),
                agreements: Vec::new(),
                disagreements: Vec::new(),
                recommendations: Vec::new(),
                contributions: [(display_name, 1u32)].into_iter().collect(),
                total_messages: 1,
                total_rounds: 1,
                consensus_reached: true,
                confidence: 0.0,
            };
            yield Event::Result {
                result,
                context: context.summary(),
            };
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("adapters", &self.adapters.len())
            .field("config", &self.config)
            .field("has_sink", &self.sink.is_some())
            .field("has_conflict_callback", &self.conflict_callback.is_some())
            .finish()
    }
}

/// Map a discussion event onto the consumer-facing union.
///
/// `ConsensusCheck` with `reached` becomes `ConsensusReached`; the
/// internal `Complete` marker is swallowed (the terminal event of the
/// coordinator stream is `Result`).
fn remap(event: DiscussionEvent) -> Option<Event> {
    match event {
        DiscussionEvent::RoundStart {
            round_num,
            max_rounds,
        } => Some(Event::RoundStart {
            round_num,
            max_rounds,
        }),
        DiscussionEvent::TurnStart { adapter } => Some(Event::AdapterStart {
            adapter_name: adapter.display_name,
            icon: adapter.icon,
            color: adapter.color,
        }),
        DiscussionEvent::Chunk {
            adapter_name,
            chunk,
        } => Some(Event::AdapterChunk {
            adapter_name,
            chunk,
        }),
        DiscussionEvent::TurnEnd {
            adapter_name,
            full_response,
        } => Some(Event::AdapterEnd {
            adapter_name,
            full_response,
        }),
        DiscussionEvent::TurnError {
            adapter_name,
            message,
        } => Some(Event::AdapterError {
            adapter_name,
            message,
        }),
        DiscussionEvent::RoundEnd { round_num } => Some(Event::RoundEnd { round_num }),
        DiscussionEvent::ConsensusCheck { round_num, reached } => {
            if reached {
                Some(Event::ConsensusReached { round_num })
            } else {
                Some(Event::ConsensusCheck { round_num, reached })
            }
        }
        DiscussionEvent::Complete { .. } => None,
    }
}
