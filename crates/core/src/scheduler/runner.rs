//! Workflow runner implementation.
//!
//! Two executors share the same gating rules:
//! - Sequential (`max_parallel = 1`): steps run one at a time in list order.
//! - Concurrent (`max_parallel > 1`): ready steps are spawned as soon as their
//!   dependencies succeeded, bounded by a semaphore.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::metrics::{RUNS_TOTAL, STEPS_TOTAL};

use super::config::SchedulerConfig;
use super::logger::{StepLogger, TracingLogger};
use super::types::{RunReport, RunStatus, Step, StepAction, StepOutcome, StepResult, StepStatus};
use super::validate::validate_steps;

/// Receives every `StepResult`-shaped event, including `running`.
pub type ProgressCallback = Arc<dyn Fn(&StepResult) + Send + Sync>;

const CANCELLED: &str = "cancelled";

enum Gate {
    Run,
    Wait,
    Skip(String),
}

/// Decide whether `step` can run given the statuses recorded so far.
fn gate(step: &Step, status_of: impl Fn(&str) -> Option<StepStatus>) -> Gate {
    if !step.enabled {
        return Gate::Skip("disabled".to_string());
    }
    let mut waiting = false;
    for dependency in &step.depends_on {
        match status_of(dependency) {
            Some(StepStatus::Success) => {}
            Some(status) => {
                return Gate::Skip(format!(
                    "dependency '{}' unmet ({})",
                    dependency,
                    status.as_str()
                ))
            }
            None => waiting = true,
        }
    }
    if waiting {
        Gate::Wait
    } else {
        Gate::Run
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn invoke(action: StepAction) -> anyhow::Result<StepOutcome> {
    match AssertUnwindSafe(async move { action().await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "step panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

/// Logger and progress sink, cloned into spawned steps.
#[derive(Clone)]
struct Hooks {
    logger: Arc<dyn StepLogger>,
    on_progress: Option<ProgressCallback>,
}

impl Hooks {
    fn emit(&self, result: &StepResult) {
        if result.status.is_terminal() {
            STEPS_TOTAL
                .with_label_values(&[result.status.as_str()])
                .inc();
        }
        if let Some(callback) = &self.on_progress {
            callback(result);
        }
    }

    fn skip(&self, step: &Step, reason: &str) -> StepResult {
        self.logger
            .log_step(&format!("Skipping step {}: {}", step.id, reason));
        let result = StepResult::for_step(step, StepStatus::Skipped, reason);
        self.emit(&result);
        result
    }

    async fn execute(&self, step: Step) -> StepResult {
        let running = StepResult::for_step(&step, StepStatus::Running, format!("{} started", step.label));
        self.emit(&running);
        self.logger
            .log_step(&format!("Running step {} ({})", step.id, step.label));

        let started = Instant::now();
        let outcome = invoke(step.action).await;

        let mut result = running;
        result.timestamp = Utc::now();
        match outcome {
            Ok(outcome) => {
                result.status = StepStatus::Success;
                result.message = if outcome.message.is_empty() {
                    "done".to_string()
                } else {
                    outcome.message
                };
                result.progress = outcome.progress;
                self.logger.log_step(&format!(
                    "Step {} succeeded in {:.1}s: {}",
                    result.step_id,
                    started.elapsed().as_secs_f64(),
                    result.message
                ));
            }
            Err(e) => {
                self.logger
                    .log_error(&format!("Step {} failed", result.step_id), &e);
                result.status = StepStatus::Error;
                result.message = format!("{:#}", e);
            }
        }
        self.emit(&result);
        result
    }
}

/// Runs step lists.
pub struct WorkflowRunner {
    config: SchedulerConfig,
    hooks: Hooks,
}

impl WorkflowRunner {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            hooks: Hooks {
                logger: Arc::new(TracingLogger),
                on_progress: None,
            },
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn StepLogger>) -> Self {
        self.hooks.logger = logger;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.hooks.on_progress = Some(callback);
        self
    }

    /// Run `steps` and return one terminal result per step, in input order.
    ///
    /// Never fails: a rejected step list yields a report with every step
    /// skipped and `preflight_error` set.
    pub async fn run(&self, steps: Vec<Step>, cancel: &CancelFlag) -> RunReport {
        if let Err(e) = validate_steps(&steps) {
            return self.reject(&steps, &e.to_string());
        }

        let started = Instant::now();
        let total = steps.len();
        let report = if self.config.is_sequential() {
            self.run_sequential(steps, cancel).await
        } else {
            self.run_concurrent(steps, cancel).await
        };

        RUNS_TOTAL
            .with_label_values(&[if report.is_success() { "success" } else { "error" }])
            .inc();
        info!(
            steps = total,
            success = report.count(StepStatus::Success),
            error = report.count(StepStatus::Error),
            skipped = report.count(StepStatus::Skipped),
            cancelled = report.cancelled,
            "Run finished in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        report
    }

    /// Report for a step list that must not run, e.g. after a failed
    /// pre-flight check. No action is invoked.
    pub fn reject(&self, steps: &[Step], reason: &str) -> RunReport {
        warn!("Rejecting run before start: {}", reason);
        let results = steps
            .iter()
            .map(|step| self.hooks.skip(step, &format!("not started: {}", reason)))
            .collect();
        RUNS_TOTAL.with_label_values(&["error"]).inc();
        RunReport {
            results,
            status: RunStatus::Error,
            cancelled: false,
            preflight_error: Some(reason.to_string()),
        }
    }

    async fn run_sequential(&self, steps: Vec<Step>, cancel: &CancelFlag) -> RunReport {
        let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut statuses: HashMap<String, StepStatus> = HashMap::new();
        let mut cancelled = false;

        for step in steps {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                self.hooks
                    .logger
                    .log_step("Cancellation requested, skipping remaining steps");
            }

            let result = if cancelled {
                self.hooks.skip(&step, CANCELLED)
            } else {
                match gate(&step, |id| statuses.get(id).copied()) {
                    Gate::Run => self.hooks.execute(step).await,
                    Gate::Skip(reason) => self.hooks.skip(&step, &reason),
                    // Dependencies always precede their dependents here.
                    Gate::Wait => self.hooks.skip(&step, "dependency unmet"),
                }
            };
            statuses.insert(result.step_id.clone(), result.status);
            results.push(result);
        }

        RunReport::from_results(results, cancelled)
    }

    async fn run_concurrent(&self, steps: Vec<Step>, cancel: &CancelFlag) -> RunReport {
        let count = steps.len();
        let ids: Vec<String> = steps.iter().map(|step| step.id.clone()).collect();
        let index_of: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut pending: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
        let mut results: Vec<Option<StepResult>> = vec![None; count];

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let mut tasks: JoinSet<(usize, StepResult)> = JoinSet::new();

        debug!(max_parallel = self.config.max_parallel, "Running steps concurrently");

        loop {
            let cancelled = cancel.is_cancelled();
            if cancelled && !observed_cancel.swap(true, Ordering::SeqCst) {
                self.hooks
                    .logger
                    .log_step("Cancellation requested, skipping steps not yet started");
            }

            for index in 0..count {
                let decision = match pending[index].as_ref() {
                    None => continue,
                    Some(_) if cancelled => Gate::Skip(CANCELLED.to_string()),
                    Some(step) => gate(step, |id| {
                        index_of
                            .get(id)
                            .and_then(|&j| results[j].as_ref())
                            .map(|r| r.status)
                    }),
                };

                match decision {
                    Gate::Wait => {}
                    Gate::Skip(reason) => {
                        if let Some(step) = pending[index].take() {
                            results[index] = Some(self.hooks.skip(&step, &reason));
                        }
                    }
                    Gate::Run => {
                        if let Some(step) = pending[index].take() {
                            let hooks = self.hooks.clone();
                            let semaphore = semaphore.clone();
                            let cancel = cancel.clone();
                            let observed = observed_cancel.clone();
                            tasks.spawn(async move {
                                let _permit = semaphore.acquire_owned().await;
                                if cancel.is_cancelled() {
                                    observed.store(true, Ordering::SeqCst);
                                    return (index, hooks.skip(&step, CANCELLED));
                                }
                                (index, hooks.execute(step).await)
                            });
                        }
                    }
                }
            }

            match tasks.join_next().await {
                Some(Ok((index, result))) => results[index] = Some(result),
                Some(Err(e)) => warn!("Step task ended abnormally: {}", e),
                None => break,
            }
        }

        // Only reachable after an abnormal task exit: whatever is left never ran.
        for (index, step) in pending.iter().enumerate() {
            if let Some(step) = step {
                results[index] = Some(self.hooks.skip(step, "dependency unmet"));
            }
        }
        let results = results
            .into_iter()
            .zip(ids.iter())
            .map(|(result, id)| {
                result.unwrap_or_else(|| StepResult {
                    step_id: id.clone(),
                    status: StepStatus::Error,
                    message: "step task ended abnormally".to_string(),
                    timestamp: Utc::now(),
                    session: None,
                    progress: None,
                })
            })
            .collect();

        RunReport::from_results(results, observed_cancel.load(Ordering::SeqCst))
    }
}
