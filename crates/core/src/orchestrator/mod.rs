//! Process-level run manager.
//!
//! Pipeline runs are started in the background and tracked by id. At most one
//! run is active at a time since every run drives the same browser sessions.

mod manager;
mod types;

pub use manager::RunManager;
pub use types::{OrchestratorError, RunEvent, RunRecord, RunState};
