//! Run manager implementation.
//!
//! Starts pipeline runs in the background, one at a time, and keeps a record
//! of every run for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::scheduler::{StepLogger, StepResult, TracingLogger, WorkflowRunner};
use crate::session::SessionPipeline;

use super::types::{OrchestratorError, RunEvent, RunRecord, RunState};

const EVENT_CAPACITY: usize = 256;

/// Drives [`SessionPipeline`] runs and routes cancellation to them.
#[derive(Clone)]
pub struct RunManager {
    pipeline: SessionPipeline,
    logger: Arc<dyn StepLogger>,
    runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
    cancels: Arc<RwLock<HashMap<Uuid, CancelFlag>>>,
    events: broadcast::Sender<RunEvent>,
}

impl RunManager {
    pub fn new(pipeline: SessionPipeline) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pipeline,
            logger: Arc::new(TracingLogger),
            runs: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn StepLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    fn runs_read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, RunRecord>> {
        self.runs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn runs_write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, RunRecord>> {
        self.runs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn cancels_write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, CancelFlag>> {
        self.cancels.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to progress of all runs.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The run currently holding the sessions, if any.
    pub fn active_run(&self) -> Option<Uuid> {
        self.runs_read()
            .values()
            .find(|r| r.state == RunState::Running)
            .map(|r| r.id)
    }

    /// Start a pipeline run in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_run(&self) -> Result<Uuid, OrchestratorError> {
        self.pipeline.preflight()?;

        let id = Uuid::new_v4();
        let cancel = CancelFlag::new();
        {
            let mut runs = self.runs_write();
            if let Some(active) = runs.values().find(|r| r.state == RunState::Running) {
                return Err(OrchestratorError::RunActive(active.id));
            }
            runs.insert(id, RunRecord::new(id));
        }
        self.cancels_write().insert(id, cancel.clone());

        info!(run_id = %id, sessions = self.config().enabled_sessions().count(), "Starting run");
        self.publish(RunEvent::Started { run_id: id });

        let manager = self.clone();
        tokio::spawn(async move { manager.drive(id, cancel).await });
        Ok(id)
    }

    async fn drive(self, id: Uuid, cancel: CancelFlag) {
        let progress = self.clone();
        let runner = WorkflowRunner::new(self.config().scheduler.clone())
            .with_logger(self.logger.clone())
            .on_progress(Arc::new(move |result: &StepResult| {
                progress.on_step(id, result);
            }));

        let report = self.pipeline.run(&runner, &cancel).await;
        let state = RunState::from_report(&report);

        if let Some(record) = self.runs_write().get_mut(&id) {
            record.finish(report.clone());
        }
        self.cancels_write().remove(&id);

        match state {
            RunState::Succeeded => info!(run_id = %id, "Run succeeded"),
            RunState::Cancelled => info!(run_id = %id, "Run cancelled"),
            _ => warn!(
                run_id = %id,
                preflight_error = ?report.preflight_error,
                "Run finished with errors"
            ),
        }
        self.publish(RunEvent::Finished {
            run_id: id,
            state,
            report,
        });
    }

    fn on_step(&self, id: Uuid, result: &StepResult) {
        if let Some(record) = self.runs_write().get_mut(&id) {
            record.record_step(result);
        }
        self.publish(RunEvent::Step {
            run_id: id,
            result: result.clone(),
        });
    }

    /// Request cancellation; the run stops at its next checkpoint.
    pub fn cancel_run(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let state = self
            .runs_read()
            .get(&id)
            .map(|r| r.state)
            .ok_or(OrchestratorError::RunNotFound(id))?;
        if state.is_finished() {
            return Err(OrchestratorError::AlreadyFinished(id));
        }

        let flag = self
            .cancels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();
        match flag {
            Some(flag) => {
                if !flag.is_cancelled() {
                    flag.cancel();
                    info!(run_id = %id, "Cancellation requested");
                }
                Ok(())
            }
            None => Err(OrchestratorError::AlreadyFinished(id)),
        }
    }

    /// Cancel every running run.
    pub fn cancel_all(&self) {
        let flags: Vec<(Uuid, CancelFlag)> = self
            .cancels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, flag)| (*id, flag.clone()))
            .collect();
        for (id, flag) in flags {
            if !flag.is_cancelled() {
                flag.cancel();
                info!(run_id = %id, "Cancelling run for shutdown");
            }
        }
    }

    pub fn get_run(&self, id: Uuid) -> Option<RunRecord> {
        self.runs_read().get(&id).cloned()
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs_read().values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }
}
