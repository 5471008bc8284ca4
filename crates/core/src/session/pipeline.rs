//! Pipeline assembly and per-session download steps.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::config::{Config, SessionConfig};
use crate::download::{DownloadDriver, DownloadLoop, RecoverySignal};
use crate::fs::FileSystem;
use crate::scheduler::{RunReport, SchedulerError, Step, StepOutcome, WorkflowRunner};
use crate::watchdog::{WatchdogEvent, WatchdogOptions, WatchdogRegistry};

use super::collect::{MoveToDirectory, PostProcessor};
use super::factory::SessionFactory;

pub const OPEN_ALL_STEP: &str = "open_all";
pub const COLLECT_STEP: &str = "collect";

pub fn download_step_id(session_id: &str) -> String {
    format!("download:{}", session_id)
}

/// Saved files per session id.
pub type SavedFiles = BTreeMap<String, Vec<PathBuf>>;

/// Reject enabled sessions sharing a debugging port or a download directory.
pub fn check_resource_bindings(sessions: &[SessionConfig]) -> Result<(), SchedulerError> {
    let mut ports: HashMap<u16, &str> = HashMap::new();
    let mut dirs: HashMap<&PathBuf, &str> = HashMap::new();

    for session in sessions.iter().filter(|s| s.enabled) {
        if let Some(first) = ports.insert(session.debug_port, session.id.as_str()) {
            return Err(SchedulerError::DuplicateResourceBinding {
                resource: format!("debugging port {}", session.debug_port),
                first: first.to_string(),
                second: session.id.clone(),
            });
        }
        if let Some(first) = dirs.insert(&session.download_dir, session.id.as_str()) {
            return Err(SchedulerError::DuplicateResourceBinding {
                resource: format!("download directory {}", session.download_dir.display()),
                first: first.to_string(),
                second: session.id.clone(),
            });
        }
    }
    Ok(())
}

/// State shared by the steps of one run.
#[derive(Default)]
struct RunState {
    opened: RwLock<HashMap<String, Arc<dyn DownloadDriver>>>,
    saved: RwLock<SavedFiles>,
}

/// Builds and runs the session pipeline for a configuration.
#[derive(Clone)]
pub struct SessionPipeline {
    config: Arc<Config>,
    factory: Arc<dyn SessionFactory>,
    fs: Arc<dyn FileSystem>,
    watchdogs: WatchdogRegistry,
    post_processor: Option<Arc<dyn PostProcessor>>,
}

impl SessionPipeline {
    /// The collect step moves files into `[collect].output_dir` when configured.
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn SessionFactory>,
        fs: Arc<dyn FileSystem>,
        watchdogs: WatchdogRegistry,
    ) -> Self {
        let post_processor = config.collect.as_ref().map(|collect| {
            Arc::new(MoveToDirectory::new(fs.clone(), collect.output_dir.clone()))
                as Arc<dyn PostProcessor>
        });
        Self {
            config,
            factory,
            fs,
            watchdogs,
            post_processor,
        }
    }

    /// Replace the collect step's processor.
    pub fn with_post_processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks that must pass before any step runs.
    pub fn preflight(&self) -> Result<(), SchedulerError> {
        check_resource_bindings(&self.config.sessions)
    }

    /// Run the whole pipeline once, closing every opened session afterwards.
    pub async fn run(&self, runner: &WorkflowRunner, cancel: &CancelFlag) -> RunReport {
        let state = Arc::new(RunState::default());
        let steps = self.build_steps(&state, cancel);

        if let Err(e) = self.preflight() {
            return runner.reject(&steps, &e.to_string());
        }

        let report = runner.run(steps, cancel).await;

        let opened: Vec<String> = state.opened.read().await.keys().cloned().collect();
        for session_id in opened {
            self.factory.close(&session_id).await;
        }
        report
    }

    fn build_steps(&self, state: &Arc<RunState>, cancel: &CancelFlag) -> Vec<Step> {
        let mut steps = Vec::with_capacity(self.config.sessions.len() + 2);

        let enabled: Vec<SessionConfig> = self.config.enabled_sessions().cloned().collect();
        let factory = self.factory.clone();
        let open_state = state.clone();
        steps.push(Step::new(OPEN_ALL_STEP, "Open sessions", move || {
            open_sessions(factory, enabled, open_state)
        }));

        let mut download_ids = Vec::new();
        for session in &self.config.sessions {
            let id = download_step_id(&session.id);
            let task = DownloadTask {
                session: session.clone(),
                config: self.config.clone(),
                fs: self.fs.clone(),
                watchdogs: self.watchdogs.clone(),
                cancel: cancel.clone(),
                state: state.clone(),
            };
            steps.push(
                Step::new(id.clone(), format!("Download {}", session.id), move || task.run())
                    .depends_on([OPEN_ALL_STEP])
                    .session(session.id.clone())
                    .enabled(session.enabled),
            );
            if session.enabled {
                download_ids.push(id);
            }
        }

        if let Some(processor) = &self.post_processor {
            let processor = processor.clone();
            let collect_state = state.clone();
            steps.push(
                Step::new(COLLECT_STEP, "Collect downloads", move || async move {
                    let saved = collect_state.saved.read().await.clone();
                    let collected = processor.process(&saved).await?;
                    Ok(StepOutcome::new(format!("collected {} files", collected.len()))
                        .with_progress(collected.len() as u64))
                })
                .depends_on(download_ids),
            );
        }

        steps
    }
}

async fn open_sessions(
    factory: Arc<dyn SessionFactory>,
    sessions: Vec<SessionConfig>,
    state: Arc<RunState>,
) -> anyhow::Result<StepOutcome> {
    if sessions.is_empty() {
        return Ok(StepOutcome::new("no enabled sessions"));
    }

    let mut failures = Vec::new();
    for session in &sessions {
        match factory.open(session).await {
            Ok(driver) => {
                state.opened.write().await.insert(session.id.clone(), driver);
            }
            Err(e) => {
                warn!(session = %session.id, "Failed to open session: {:#}", e);
                failures.push(format!("{}: {:#}", session.id, e));
            }
        }
    }

    let opened = sessions.len() - failures.len();
    if opened == 0 {
        anyhow::bail!("no session could be opened ({})", failures.join("; "));
    }
    let message = if failures.is_empty() {
        format!("opened {} sessions", opened)
    } else {
        format!(
            "opened {}/{} sessions ({})",
            opened,
            sessions.len(),
            failures.join("; ")
        )
    };
    Ok(StepOutcome::new(message).with_progress(opened as u64))
}

/// Everything one `download:<id>` step needs.
struct DownloadTask {
    session: SessionConfig,
    config: Arc<Config>,
    fs: Arc<dyn FileSystem>,
    watchdogs: WatchdogRegistry,
    cancel: CancelFlag,
    state: Arc<RunState>,
}

impl DownloadTask {
    async fn run(self) -> anyhow::Result<StepOutcome> {
        let session_id = self.session.id.clone();
        let driver = self
            .state
            .opened
            .read()
            .await
            .get(&session_id)
            .cloned()
            .with_context(|| format!("session '{}' was not opened", session_id))?;

        // Escalation cancels this session only; run-level cancellation still
        // reaches it through the parent flag.
        let session_cancel = self.cancel.child_token();
        let recovery = RecoverySignal::new();

        let run_id = format!("{}:{}", session_id, Uuid::new_v4());
        let signal = recovery.clone();
        let tag = session_id.clone();
        let guard = self.watchdogs.start(
            &run_id,
            WatchdogOptions {
                timeout: Duration::from_millis(self.config.watchdog.timeout_ms),
                escalation_threshold: self.config.watchdog.escalation_threshold,
                cancel: session_cancel.clone(),
            },
            Arc::new(move |event: &WatchdogEvent| {
                if event.is_recoverable() {
                    warn!(
                        session = %tag,
                        consecutive = event.consecutive,
                        "No progress within watchdog timeout, requesting session recovery"
                    );
                    signal.request();
                } else if event.escalated {
                    error!(
                        session = %tag,
                        consecutive = event.consecutive,
                        "Watchdog escalated, cancelling session"
                    );
                }
            }),
        )?;

        info!(
            session = %session_id,
            run_id = %run_id,
            max_items = self.session.max_items,
            "Starting downloads"
        );
        let result = DownloadLoop::new(
            driver,
            self.fs.clone(),
            self.config.download.clone(),
            self.session.download_dir.clone(),
            self.session.max_items,
        )
        .session_id(session_id.clone())
        .cancel_flag(session_cancel.clone())
        .recovery(recovery)
        .watchdog(guard.handle())
        .run()
        .await;
        drop(guard);

        let outcome = result.with_context(|| format!("download loop for session '{}'", session_id))?;
        self.state
            .saved
            .write()
            .await
            .insert(session_id.clone(), outcome.saved_paths.clone());

        let summary = format!("{}/{} items", outcome.completed, self.session.max_items);
        if outcome.is_done() {
            Ok(StepOutcome::new(format!("saved {}", summary)).with_progress(outcome.completed as u64))
        } else if self.cancel.is_cancelled() {
            Ok(StepOutcome::new(format!("cancelled after {}", summary))
                .with_progress(outcome.completed as u64))
        } else if session_cancel.is_cancelled() {
            anyhow::bail!("watchdog cancelled session after {}", summary)
        } else {
            anyhow::bail!(
                "stopped after {} (last state {})",
                summary,
                outcome.last_state
            )
        }
    }
}
