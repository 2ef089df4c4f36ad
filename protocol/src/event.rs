//! Events emitted by the coordinator.
//!
//! The event stream is the only externally observable surface of a
//! running request. Consumers render it; nothing here is stored.

use serde::Deserialize;
use serde::Serialize;

use crate::Action;
use crate::ApprovalOutcome;
use crate::Conflict;
use crate::ContextSummary;
use crate::ImportanceLevel;
use crate::Resolution;
use crate::SynthesisResult;
use crate::Task;

/// Display identity of a selected adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    pub display_name: String,
    pub icon: String,
    pub color: String,
}

/// Events produced while processing one user request.
///
/// Ordering guarantees: `TaskAnalyzed` (when emitted) precedes
/// `AdaptersSelected`, which precedes any round events; within a round
/// each adapter's `AdapterStart`/`AdapterChunk*`/`AdapterEnd` group is
/// contiguous and groups follow selection order; `Result` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // ========== Request setup ==========
    /// Task analysis finished. Not emitted on the fast path.
    TaskAnalyzed { task: Task },
    /// Adapters were chosen for the discussion, in speaking order.
    AdaptersSelected {
        adapters: Vec<AdapterInfo>,
        explanation: String,
    },

    // ========== Round lifecycle ==========
    /// A discussion round is starting.
    RoundStart { round_num: u32, max_rounds: u32 },
    /// All adapters in the round have spoken (or failed).
    RoundEnd { round_num: u32 },

    // ========== Adapter turns ==========
    /// An adapter's turn is starting.
    AdapterStart {
        adapter_name: String,
        icon: String,
        color: String,
    },
    /// One streamed chunk of an adapter's response.
    AdapterChunk { adapter_name: String, chunk: String },
    /// An adapter's turn finished; carries the joined response.
    AdapterEnd {
        adapter_name: String,
        full_response: String,
    },
    /// An adapter failed this turn. The round continues without it.
    AdapterError {
        adapter_name: String,
        message: String,
    },

    // ========== Consensus & conflict ==========
    /// Consensus heuristic ran after a round.
    ConsensusCheck { round_num: u32, reached: bool },
    /// The heuristic declared agreement; the discussion ends early.
    ConsensusReached { round_num: u32 },
    /// Substantive disagreement was detected and voted on.
    ConflictDetected {
        conflict: Conflict,
        resolution: Resolution,
    },
    /// A close-race conflict was settled, possibly by the user.
    ConflictResolved {
        conflict: Conflict,
        resolution: Resolution,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_choice: Option<String>,
    },

    // ========== Approval ==========
    /// A proposed action needs user approval.
    ApprovalRequested {
        action: Action,
        importance: ImportanceLevel,
    },
    /// Approval decision arrived.
    ApprovalResult { result: ApprovalOutcome },

    // ========== Terminal ==========
    /// Final synthesis. Always the last event of a completed request.
    Result {
        result: SynthesisResult,
        context: ContextSummary,
    },
}

impl Event {
    /// Round number carried by this event, when it has one.
    pub fn round_num(&self) -> Option<u32> {
        match self {
            Event::RoundStart { round_num, .. }
            | Event::RoundEnd { round_num }
            | Event::ConsensusCheck { round_num, .. }
            | Event::ConsensusReached { round_num } => Some(*round_num),
            _ => None,
        }
    }

    /// True for the terminal `Result` event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Result { .. })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn events_tag_with_snake_case_type() {
        let event = Event::RoundStart {
            round_num: 1,
            max_rounds: 5,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "round_start");
        assert_eq!(json["round_num"], 1);
        assert_eq!(json["max_rounds"], 5);
    }

    #[test]
    fn chunk_event_round_trips() {
        let event = Event::AdapterChunk {
            adapter_name: "claude".to_string(),
            chunk: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        match back {
            Event::AdapterChunk {
                adapter_name,
                chunk,
            } => {
                assert_eq!(adapter_name, "claude");
                assert_eq!(chunk, "hello");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn round_num_accessor_covers_round_events() {
        assert_eq!(Event::RoundEnd { round_num: 3 }.round_num(), Some(3));
        assert_eq!(
            Event::AdapterChunk {
                adapter_name: "x".to_string(),
                chunk: String::new(),
            }
            .round_num(),
            None
        );
    }
}
