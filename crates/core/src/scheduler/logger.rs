//! Logging collaborator for step execution.

use tracing::{error, info};

/// Fire-and-forget sink for step log lines.
pub trait StepLogger: Send + Sync {
    fn log_step(&self, message: &str);

    fn log_error(&self, message: &str, error: &anyhow::Error);
}

/// [`StepLogger`] that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl StepLogger for TracingLogger {
    fn log_step(&self, message: &str) {
        info!("{}", message);
    }

    fn log_error(&self, message: &str, error: &anyhow::Error) {
        error!("{}: {:#}", message, error);
    }
}
