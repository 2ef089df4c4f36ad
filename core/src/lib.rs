//! Core of the quorum deliberation engine.
//!
//! One user request flows through: task analysis → adapter selection →
//! a bounded multi-round discussion → conflict detection and weighted
//! voting → synthesis. The [`coordinator::Coordinator`] composes these
//! and emits the typed event stream a front-end renders; adapters wrap
//! the actual backends (local CLIs over pipes or a PTY, HTTP APIs over
//! SSE) behind one capability trait.

pub mod adapters;
pub mod analyzer;
pub mod approval;
pub mod availability;
pub mod breaker;
pub mod conflict;
pub mod context;
pub mod coordinator;
pub mod discussion;
pub mod error;
pub mod retry;
pub mod selector;
pub mod spawn;
pub mod synthesizer;

pub use adapters::Adapter;
pub use adapters::AdapterRegistry;
pub use adapters::ChunkStream;
pub use adapters::check_adapters_parallel;
pub use availability::AvailabilityCache;
pub use breaker::BreakerRegistry;
pub use breaker::BreakerState;
pub use breaker::CircuitBreaker;
pub use context::Message;
pub use context::SharedContext;
pub use coordinator::Coordinator;
pub use coordinator::CoordinatorConfig;
pub use coordinator::SessionSink;
pub use discussion::DiscussionConfig;
pub use discussion::DiscussionManager;
pub use error::QuorumErr;
pub use error::Result;
pub use error::friendly_message;
pub use retry::RetryConfig;
pub use retry::run_with_retry;
pub use selector::Selector;
pub use synthesizer::Synthesizer;
