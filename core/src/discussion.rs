//! Multi-adapter discussion loop.
//!
//! Runs up to `suggested_rounds` rounds; within a round adapters speak
//! strictly in selection order, so a later adapter's prompt already
//! contains the earlier adapters' messages. One adapter's failure never
//! aborts a round. Consensus is checked after every round from the
//! second onward and ends the discussion early when declared.
//!
//! [`DiscussionManager::run_round`] is the building block: the
//! coordinator drives rounds one at a time so it can inspect the context
//! (conflict detection, user arbitration) between rounds while no borrow
//! is held. [`DiscussionManager::run`] composes the full loop for
//! callers that do not need to intervene.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use quorum_protocol::AdapterInfo;
use quorum_protocol::Task;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::adapters;
use crate::adapters::Adapter;
use crate::breaker::BreakerRegistry;
use crate::context::SharedContext;
use crate::retry::RetryConfig;
use crate::retry::run_with_retry;

/// Phrases that signal agreement, across the languages adapters answer
/// in. Substring match on lowercased content.
const AGREEMENT_PHRASES: &[&str] = &[
    "agree",
    "동의",
    "맞습니다",
    "correct",
    "좋은 의견",
    "good point",
    "build on",
    "추가하면",
    "덧붙이면",
    "adding to",
];

/// Messages inspected by the consensus heuristic.
const CONSENSUS_WINDOW: usize = 4;

/// Discussion tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionConfig {
    /// Hard cap on rounds regardless of the task's suggestion.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Agreement fraction at or above which consensus is declared.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_enable_consensus_check")]
    pub enable_consensus_check: bool,
    /// Responses shorter than this are still accepted; the floor only
    /// feeds diagnostics.
    #[serde(default = "default_min_response_length")]
    pub min_response_length: u32,
}

fn default_max_rounds() -> u32 {
    5
}
fn default_consensus_threshold() -> f64 {
    0.7
}
fn default_enable_consensus_check() -> bool {
    true
}
fn default_min_response_length() -> u32 {
    50
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            consensus_threshold: default_consensus_threshold(),
            enable_consensus_check: default_enable_consensus_check(),
            min_response_length: default_min_response_length(),
        }
    }
}

/// Progress of one discussion.
#[derive(Debug, Clone, Default)]
pub struct DiscussionState {
    pub current_round: u32,
    pub is_complete: bool,
    pub consensus_reached: bool,
    /// Successful responses per adapter display name.
    pub responses: BTreeMap<String, Vec<String>>,
}

/// Events emitted while a discussion runs. The coordinator remaps these
/// onto the consumer-facing event union.
#[derive(Debug, Clone)]
pub enum DiscussionEvent {
    RoundStart {
        round_num: u32,
        max_rounds: u32,
    },
    TurnStart {
        adapter: AdapterInfo,
    },
    Chunk {
        adapter_name: String,
        chunk: String,
    },
    TurnEnd {
        adapter_name: String,
        full_response: String,
    },
    TurnError {
        adapter_name: String,
        message: String,
    },
    RoundEnd {
        round_num: u32,
    },
    ConsensusCheck {
        round_num: u32,
        reached: bool,
    },
    Complete {
        total_rounds: u32,
        consensus_reached: bool,
    },
}

/// Drives one discussion. Create a fresh manager per request.
#[derive(Debug, Default)]
pub struct DiscussionManager {
    pub config: DiscussionConfig,
    pub state: DiscussionState,
}

impl DiscussionManager {
    pub fn new(config: DiscussionConfig) -> Self {
        Self {
            config,
            state: DiscussionState::default(),
        }
    }

    /// Rounds this discussion will run at most.
    pub fn round_budget(&self, task: &Task) -> u32 {
        task.suggested_rounds.min(self.config.max_rounds).max(1)
    }

    /// Run one round: `RoundStart`, one turn per adapter in order,
    /// `RoundEnd`, and (from round two) a `ConsensusCheck`.
    ///
    /// The context is mutated only between adapter calls, never during
    /// streaming; dropping the returned stream cancels the in-flight
    /// adapter call. When consensus is declared the manager records it
    /// in its state and in the context.
    pub fn run_round<'a>(
        &'a mut self,
        round_num: u32,
        max_rounds: u32,
        adapters: &'a [Arc<dyn Adapter>],
        context: &'a mut SharedContext,
        breakers: &'a BreakerRegistry,
    ) -> impl Stream<Item = DiscussionEvent> + 'a {
        async_stream::stream! {
            self.state.current_round = round_num;
            yield DiscussionEvent::RoundStart { round_num, max_rounds };

            for adapter in adapters {
                let display_name = adapter.display_name().to_string();
                let prompt = context.build_prompt(&display_name, round_num == 1);
                yield DiscussionEvent::TurnStart {
                    adapter: adapters::info(adapter.as_ref()),
                };

                let breaker = breakers.breaker_for(adapter.name());
                if let Err(err) = breaker.try_acquire() {
                    yield DiscussionEvent::TurnError {
                        adapter_name: display_name,
                        message: err.to_string(),
                    };
                    continue;
                }

                // Retry covers establishing the stream; chunks are
                // non-restartable, so mid-stream failures fail the turn.
                let retry_config = RetryConfig::default()
                    .with_max_retries(adapter.config().max_retries)
                    .with_base_delay(Duration::from_secs_f64(
                        adapter.config().retry_delay_secs.max(0.0),
                    ));
                let opened = run_with_retry(&retry_config, adapter.name(), || {
                    adapter.send(&prompt)
                })
                .await;

                let mut chunk_stream = match opened {
                    Ok(stream) => stream,
                    Err(err) => {
                        breaker.record_failure();
                        yield DiscussionEvent::TurnError {
                            adapter_name: display_name,
                            message: err.to_string(),
                        };
                        continue;
                    }
                };

                let mut response = String::new();
                let mut turn_error: Option<String> = None;
                while let Some(item) = chunk_stream.next().await {
                    match item {
                        Ok(chunk) => {
                            response.push_str(&chunk);
                            yield DiscussionEvent::Chunk {
                                adapter_name: display_name.clone(),
                                chunk,
                            };
                        }
                        Err(err) => {
                            turn_error = Some(err.to_string());
                            break;
                        }
                    }
                }
                drop(chunk_stream);

                if let Some(message) = turn_error {
                    breaker.record_failure();
                    yield DiscussionEvent::TurnError {
                        adapter_name: display_name,
                        message,
                    };
                    continue;
                }

                breaker.record_success();
                if (response.chars().count() as u32) < self.config.min_response_length {
                    debug!(adapter = %display_name, "response below minimum length");
                }
                context.append(&display_name, &response, round_num);
                self.state
                    .responses
                    .entry(display_name.clone())
                    .or_default()
                    .push(response.clone());
                yield DiscussionEvent::TurnEnd {
                    adapter_name: display_name,
                    full_response: response,
                };
            }

            yield DiscussionEvent::RoundEnd { round_num };

            if round_num > 1 && self.config.enable_consensus_check {
                let reached = check_consensus(context, self.config.consensus_threshold);
                yield DiscussionEvent::ConsensusCheck { round_num, reached };
                if reached {
                    info!(round = round_num, "consensus reached, ending discussion early");
                    self.state.consensus_reached = true;
                    context.consensus_reached = true;
                }
            }
        }
    }

    /// Run the whole discussion, emitting events lazily.
    pub fn run<'a>(
        &'a mut self,
        task: &'a Task,
        adapters: &'a [Arc<dyn Adapter>],
        context: &'a mut SharedContext,
        breakers: &'a BreakerRegistry,
    ) -> impl Stream<Item = DiscussionEvent> + 'a {
        self.state = DiscussionState::default();
        let max_rounds = self.round_budget(task);

        async_stream::stream! {
            for round_num in 1..=max_rounds {
                {
                    let round = self.run_round(round_num, max_rounds, adapters, context, breakers);
                    futures::pin_mut!(round);
                    while let Some(event) = round.next().await {
                        yield event;
                    }
                }
                if self.state.consensus_reached {
                    break;
                }
            }

            self.state.is_complete = true;
            yield DiscussionEvent::Complete {
                total_rounds: self.state.current_round,
                consensus_reached: self.state.consensus_reached,
            };
        }
    }
}

/// Agreement fraction over the last `min(4, n)` messages, compared to
/// the threshold. Never declared with fewer than two messages.
pub fn check_consensus(context: &SharedContext, threshold: f64) -> bool {
    let recent = context.recent_messages(CONSENSUS_WINDOW);
    if recent.len() < 2 {
        return false;
    }

    let agreeing = recent
        .iter()
        .filter(|message| {
            let content = message.content.to_lowercase();
            AGREEMENT_PHRASES
                .iter()
                .any(|phrase| content.contains(phrase))
        })
        .count();

    agreeing as f64 / recent.len() as f64 >= threshold
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use quorum_protocol::AdapterConfig;
    use quorum_protocol::TaskType;

    use super::*;
    use crate::adapters::ChunkStream;
    use crate::error::QuorumErr;
    use crate::error::Result;

    struct ScriptedAdapter {
        name: String,
        /// One entry per round; `Err` fails the turn.
        responses: std::sync::Mutex<Vec<Result<String>>>,
        config: AdapterConfig,
    }

    impl ScriptedAdapter {
        fn boxed(name: &str, responses: Vec<Result<String>>) -> Arc<dyn Adapter> {
            Arc::new(Self {
                name: name.to_string(),
                responses: std::sync::Mutex::new(responses),
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
            let next = self.responses.lock().expect("lock").remove(0);
            match next {
                Ok(text) => {
                    // Split into two chunks to exercise accumulation.
                    let mid = text
                        .char_indices()
                        .nth(text.chars().count() / 2)
                        .map(|(i, _)| i)
                        .unwrap_or(text.len());
                    let parts = vec![Ok(text[..mid].to_string()), Ok(text[mid..].to_string())];
                    Ok(Box::pin(futures::stream::iter(parts)))
                }
                Err(err) => Err(err),
            }
        }
    }

    fn task(rounds: u32) -> Task {
        Task {
            prompt: "discuss this topic in depth please".to_string(),
            task_type: TaskType::Design,
            complexity: 0.6,
            keywords: vec![],
            requires_code: false,
            requires_creativity: false,
            requires_analysis: false,
            suggested_rounds: rounds,
            suggested_ai_count: 2,
        }
    }

    async fn collect(
        manager: &mut DiscussionManager,
        task: &Task,
        adapters: &[Arc<dyn Adapter>],
        context: &mut SharedContext,
    ) -> Vec<DiscussionEvent> {
        let breakers = BreakerRegistry::default();
        let stream = manager.run(task, adapters, context, &breakers);
        stream.collect().await
    }

    fn ok(text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn adapters_speak_in_order_and_rounds_complete() {
        let adapters = vec![
            ScriptedAdapter::boxed("alpha", vec![ok("alpha r1"), ok("alpha r2")]),
            ScriptedAdapter::boxed("beta", vec![ok("beta r1"), ok("beta r2")]),
        ];
        let mut context = SharedContext::new("question");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(2), &adapters, &mut context).await;

        let turn_ends: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                DiscussionEvent::TurnEnd { adapter_name, .. } => Some(adapter_name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(turn_ends, vec!["alpha", "beta", "alpha", "beta"]);
        assert!(matches!(
            events.last(),
            Some(DiscussionEvent::Complete { total_rounds: 2, .. })
        ));
        assert_eq!(context.messages().len(), 4);
    }

    #[tokio::test]
    async fn later_adapter_sees_earlier_messages_in_same_round() {
        let adapters = vec![
            ScriptedAdapter::boxed("alpha", vec![ok("alpha speaks first"), ok("alpha again")]),
            ScriptedAdapter::boxed("beta", vec![ok("beta r1"), ok("beta r2")]),
        ];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let _ = collect(&mut manager, &task(2), &adapters, &mut context).await;

        // Within each round, alpha's message precedes beta's, so beta's
        // round-2 prompt included alpha's round-2 message.
        let round2: Vec<&str> = context
            .messages_for_round(2)
            .map(|m| m.sender.as_str())
            .collect();
        assert_eq!(round2, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn failing_adapter_does_not_abort_the_round() {
        let adapters = vec![
            ScriptedAdapter::boxed(
                "broken",
                vec![
                    Err(QuorumErr::Backend("exit 1".into())),
                    Err(QuorumErr::Backend("exit 1".into())),
                ],
            ),
            ScriptedAdapter::boxed("healthy", vec![ok("fine r1"), ok("fine r2")]),
        ];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(2), &adapters, &mut context).await;

        let errors = events
            .iter()
            .filter(|e| matches!(e, DiscussionEvent::TurnError { .. }))
            .count();
        assert_eq!(errors, 2);

        let round_ends = events
            .iter()
            .filter(|e| matches!(e, DiscussionEvent::RoundEnd { .. }))
            .count();
        assert_eq!(round_ends, 2);
        assert_eq!(manager.state.responses.get("healthy").map(Vec::len), Some(2));
        assert!(!manager.state.responses.contains_key("broken"));
    }

    #[tokio::test]
    async fn all_adapters_failing_still_finishes_every_round() {
        let adapters = vec![ScriptedAdapter::boxed(
            "broken",
            vec![
                Err(QuorumErr::Connection("down".into())),
                Err(QuorumErr::Connection("down".into())),
            ],
        )];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(2), &adapters, &mut context).await;

        let round_ends = events
            .iter()
            .filter(|e| matches!(e, DiscussionEvent::RoundEnd { .. }))
            .count();
        assert_eq!(round_ends, 2);
        assert!(matches!(
            events.last(),
            Some(DiscussionEvent::Complete {
                consensus_reached: false,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn consensus_ends_the_discussion_early() {
        let adapters = vec![
            ScriptedAdapter::boxed(
                "alpha",
                vec![ok("I agree with the approach"), ok("I agree again"), ok("unused")],
            ),
            ScriptedAdapter::boxed(
                "beta",
                vec![ok("agree, good point"), ok("I agree as well"), ok("unused")],
            ),
        ];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(5), &adapters, &mut context).await;

        assert!(events.iter().any(|e| matches!(
            e,
            DiscussionEvent::ConsensusCheck { reached: true, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(DiscussionEvent::Complete {
                total_rounds: 2,
                consensus_reached: true,
            })
        ));
        assert!(context.consensus_reached);
    }

    #[tokio::test]
    async fn consensus_never_checked_in_round_one() {
        let adapters = vec![
            ScriptedAdapter::boxed("alpha", vec![ok("I agree"), ok("more")]),
            ScriptedAdapter::boxed("beta", vec![ok("agree too"), ok("more")]),
        ];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(2), &adapters, &mut context).await;

        assert!(!events.iter().any(|e| matches!(
            e,
            DiscussionEvent::ConsensusCheck { round_num: 1, .. }
        )));
    }

    #[tokio::test]
    async fn chunks_are_forwarded_before_turn_end() {
        let adapters = vec![ScriptedAdapter::boxed("alpha", vec![ok("abcdef")])];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(1), &adapters, &mut context).await;

        let mut saw_chunk = false;
        for event in &events {
            match event {
                DiscussionEvent::Chunk { chunk, .. } => {
                    saw_chunk = true;
                    assert!(!chunk.is_empty());
                }
                DiscussionEvent::TurnEnd { full_response, .. } => {
                    assert!(saw_chunk, "chunks must precede TurnEnd");
                    assert_eq!(full_response, "abcdef");
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn single_round_budget_is_respected() {
        let adapters = vec![ScriptedAdapter::boxed("alpha", vec![ok("only round")])];
        let mut context = SharedContext::new("q");
        let mut manager = DiscussionManager::default();
        let events = collect(&mut manager, &task(1), &adapters, &mut context).await;
        let rounds = events
            .iter()
            .filter(|e| matches!(e, DiscussionEvent::RoundStart { .. }))
            .count();
        assert_eq!(rounds, 1);
    }

    #[test]
    fn consensus_requires_two_messages() {
        let mut context = SharedContext::new("q");
        context.append("alpha", "I agree completely", 2);
        assert!(!check_consensus(&context, 0.7));
        context.append("beta", "agree, good point", 2);
        assert!(check_consensus(&context, 0.7));
    }

    #[test]
    fn consensus_threshold_is_respected() {
        let mut context = SharedContext::new("q");
        context.append("a", "I agree", 2);
        context.append("b", "not convinced at all", 2);
        context.append("c", "strongly disagree here", 2);
        context.append("d", "no comment", 2);
        // 1 of 4 agreeing: below the default threshold.
        assert!(!check_consensus(&context, 0.7));
        assert!(check_consensus(&context, 0.25));
    }
}
