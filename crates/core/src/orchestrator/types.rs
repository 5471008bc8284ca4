//! Types for the run manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::{RunReport, SchedulerError, StepResult};

/// Errors that can occur when managing runs.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Run not found.
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Only one pipeline run may hold the browser sessions at a time.
    #[error("run {0} is still active")]
    RunActive(Uuid),

    /// The run already reached a final state.
    #[error("run {0} already finished")]
    AlreadyFinished(Uuid),

    /// The configured sessions failed pre-flight validation.
    #[error("pre-flight check failed: {0}")]
    Preflight(#[from] SchedulerError),
}

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        self != RunState::Running
    }

    /// Final state for a finished report.
    pub fn from_report(report: &RunReport) -> Self {
        if report.cancelled {
            RunState::Cancelled
        } else if report.is_success() {
            RunState::Succeeded
        } else {
            RunState::Failed
        }
    }
}

/// Everything known about one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Latest event per step, in first-seen order.
    pub steps: Vec<StepResult>,
    /// Set once the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

impl RunRecord {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            report: None,
        }
    }

    /// Replace the step's previous event, or append the first one.
    pub(crate) fn record_step(&mut self, result: &StepResult) {
        match self.steps.iter_mut().find(|s| s.step_id == result.step_id) {
            Some(existing) => *existing = result.clone(),
            None => self.steps.push(result.clone()),
        }
    }

    pub(crate) fn finish(&mut self, report: RunReport) {
        self.state = RunState::from_report(&report);
        self.finished_at = Some(Utc::now());
        self.steps = report.results.clone();
        self.report = Some(report);
    }
}

/// Broadcast to subscribers while runs progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: Uuid,
    },
    Step {
        run_id: Uuid,
        result: StepResult,
    },
    Finished {
        run_id: Uuid,
        state: RunState,
        report: RunReport,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::Started { run_id }
            | RunEvent::Step { run_id, .. }
            | RunEvent::Finished { run_id, .. } => *run_id,
        }
    }
}
