//! Conflict handling and reconnect-driven sync.

mod conflict;
mod orchestrator;

pub use conflict::{Conflict, ConflictResolver, ConflictStrategy};
pub use orchestrator::SyncOrchestrator;
