//! Shared data model for the quorum deliberation engine.
//!
//! This crate holds the types that cross component boundaries: the
//! analyzed [`Task`], the consumer-facing [`Event`] union, conflict and
//! resolution records, approval types, and adapter configuration. It has
//! no behavior beyond constructors and small accessors so that front-ends
//! can depend on it without pulling in the engine.

mod approval;
mod config;
mod conflict;
mod event;
mod session;
mod synthesis;
mod task;

pub use approval::Action;
pub use approval::ActionType;
pub use approval::AiVote;
pub use approval::ApprovalOutcome;
pub use approval::ApprovalStatus;
pub use approval::ImportanceLevel;
pub use config::AdapterConfig;
pub use config::AdapterResponse;
pub use config::HealthState;
pub use config::HealthStatus;
pub use conflict::Conflict;
pub use conflict::ConflictSeverity;
pub use conflict::Opinion;
pub use conflict::Resolution;
pub use conflict::ResolutionKind;
pub use conflict::VotedOption;
pub use event::AdapterInfo;
pub use event::Event;
pub use session::SenderType;
pub use session::Session;
pub use session::SessionResult;
pub use session::SessionStatus;
pub use session::StoredMessage;
pub use synthesis::ContextSummary;
pub use synthesis::Contribution;
pub use synthesis::SynthesisResult;
pub use task::Task;
pub use task::TaskType;
