//! Step scheduler.
//!
//! Runs a caller-ordered list of [`Step`]s with declared prerequisites and
//! collects one [`StepResult`] per step. A failing step never aborts the run;
//! its dependents are skipped instead.

mod config;
mod logger;
mod runner;
mod types;
mod validate;

pub use config::SchedulerConfig;
pub use logger::{StepLogger, TracingLogger};
pub use runner::{ProgressCallback, WorkflowRunner};
pub use types::{RunReport, RunStatus, Step, StepAction, StepOutcome, StepResult, StepStatus};
pub use validate::{validate_steps, SchedulerError};
