//! Scheduler data types.

use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Executable body of a step.
pub type StepAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<StepOutcome>> + Send>;

/// What a successful action reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub message: String,
    /// Numeric progress, e.g. items produced.
    pub progress: Option<u64>,
}

impl StepOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: u64) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// A named unit of pipeline work.
pub struct Step {
    pub id: String,
    pub label: String,
    pub enabled: bool,
    /// Ids of steps that must have succeeded first. They must appear earlier
    /// in the list.
    pub depends_on: Vec<String>,
    /// Session this step belongs to, if any.
    pub session: Option<String>,
    pub action: StepAction,
}

impl Step {
    pub fn new<F, Fut>(id: impl Into<String>, label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<StepOutcome>> + Send + 'static,
    {
        Self {
            id: id.into(),
            label: label.into(),
            enabled: true,
            depends_on: Vec::new(),
            session: None,
            action: Box::new(move || Box::pin(action())),
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .field("depends_on", &self.depends_on)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        self != StepStatus::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// Progress event and final record for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u64>,
}

impl StepResult {
    pub(crate) fn for_step(step: &Step, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step_id: step.id.clone(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            session: step.session.clone(),
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Everything one scheduler invocation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal result per step, in input order.
    pub results: Vec<StepResult>,
    pub status: RunStatus,
    pub cancelled: bool,
    /// Set when the step list was rejected before anything ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight_error: Option<String>,
}

impl RunReport {
    /// Aggregate status: success only without errors and without cancellation.
    pub(crate) fn from_results(results: Vec<StepResult>, cancelled: bool) -> Self {
        let failed = results.iter().any(|r| r.status == StepStatus::Error);
        let status = if failed || cancelled {
            RunStatus::Error
        } else {
            RunStatus::Success
        };
        Self {
            results,
            status,
            cancelled,
            preflight_error: None,
        }
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = Step::new("download:s1", "Download s1", || async {
            Ok(StepOutcome::new("ok"))
        })
        .depends_on(["open_all"])
        .session("s1")
        .enabled(false);

        assert_eq!(step.depends_on, vec!["open_all".to_string()]);
        assert_eq!(step.session.as_deref(), Some("s1"));
        assert!(!step.enabled);
    }

    #[test]
    fn test_result_serialization() {
        let step = Step::new("a", "A", || async { Ok(StepOutcome::default()) });
        let result = StepResult::for_step(&step, StepStatus::Skipped, "dependency unmet");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(json.get("session").is_none());
    }

    #[test]
    fn test_report_status() {
        let step = Step::new("a", "A", || async { Ok(StepOutcome::default()) });
        let ok = StepResult::for_step(&step, StepStatus::Success, "");
        let skipped = StepResult::for_step(&step, StepStatus::Skipped, "");

        assert!(RunReport::from_results(vec![ok.clone(), skipped], false).is_success());
        assert!(!RunReport::from_results(vec![ok.clone()], true).is_success());

        let err = StepResult::for_step(&step, StepStatus::Error, "boom");
        assert_eq!(
            RunReport::from_results(vec![ok, err], false).status,
            RunStatus::Error
        );
    }
}
