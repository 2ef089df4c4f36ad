//! Session history persistence.
//!
//! SQLite-backed store for sessions, their messages, and their results.
//! Writes are transactional behind a single connection; read sessions
//! see committed state only. Exports cover Markdown, JSON and plain
//! text, and JSON exports can be imported back losslessly.

mod export;
mod store;

pub use export::ExportFormat;
pub use export::export_session;
pub use export::import_json;
pub use store::HistoryStore;
pub use store::StoreError;
pub use store::StoreStats;
