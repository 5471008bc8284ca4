//! The download acquisition loop.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::fs::FileSystem;
use crate::metrics::{
    ITEMS_DOWNLOADED, ITEM_ACQUISITION_DURATION, ITERATION_FAILURES, LOOP_SETUP_FAILURES,
};
use crate::polling::{snapshot_dir, wait_for_new_entry, wait_for_saved_file, SaveCriteria, SavedFile};
use crate::watchdog::WatchdogHandle;

use super::config::DownloadConfig;
use super::driver::DownloadDriver;
use super::error::DownloadError;
use super::state::DownloadState;

/// Observer for state transitions.
pub type StateCallback = Arc<dyn Fn(DownloadState) + Send + Sync>;

/// Set by the watchdog when a session should be re-acquired.
///
/// The loop consumes the request at its next per-iteration checkpoint.
#[derive(Debug, Clone, Default)]
pub struct RecoverySignal {
    requested: Arc<AtomicBool>,
}

impl RecoverySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear the request, returning whether one was pending.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

/// What a finished loop produced.
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub completed: u32,
    /// Saved files in completion order.
    pub saved_paths: Vec<PathBuf>,
    pub last_state: DownloadState,
}

impl LoopOutcome {
    pub fn is_done(&self) -> bool {
        self.last_state.is_terminal()
    }
}

/// One session's download loop.
///
/// ```rust,ignore
/// let outcome = DownloadLoop::new(driver, fs, config, "/downloads/s1", 5)
///     .session_id("s1")
///     .cancel_flag(cancel)
///     .watchdog(guard.handle())
///     .run()
///     .await?;
/// ```
pub struct DownloadLoop {
    driver: Arc<dyn DownloadDriver>,
    fs: Arc<dyn FileSystem>,
    config: DownloadConfig,
    download_dir: PathBuf,
    max_items: u32,
    session_id: String,
    cancel: CancelFlag,
    recovery: RecoverySignal,
    watchdog: Option<WatchdogHandle>,
    on_state_change: Option<StateCallback>,
}

impl DownloadLoop {
    pub fn new(
        driver: Arc<dyn DownloadDriver>,
        fs: Arc<dyn FileSystem>,
        config: DownloadConfig,
        download_dir: impl Into<PathBuf>,
        max_items: u32,
    ) -> Self {
        Self {
            driver,
            fs,
            config,
            download_dir: download_dir.into(),
            max_items,
            session_id: String::new(),
            cancel: CancelFlag::new(),
            recovery: RecoverySignal::new(),
            watchdog: None,
            on_state_change: None,
        }
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn recovery(mut self, signal: RecoverySignal) -> Self {
        self.recovery = signal;
        self
    }

    /// Send a heartbeat on every state transition.
    pub fn watchdog(mut self, handle: WatchdogHandle) -> Self {
        self.watchdog = Some(handle);
        self
    }

    pub fn on_state_change(mut self, callback: StateCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    fn enter(&self, state: &mut DownloadState, next: DownloadState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal download transition {} -> {}",
            state,
            next
        );
        debug!(session = %self.session_id, from = %state, to = %next, "Download state change");
        *state = next;
        self.beat();
        if let Some(callback) = &self.on_state_change {
            callback(next);
        }
    }

    fn beat(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.heartbeat();
        }
    }

    /// Run until `max_items` files are saved, the feed gets stuck, or
    /// cancellation is observed.
    ///
    /// Returns an error only when the first item cannot be opened or a
    /// requested recovery fails. Iteration-level failures are absorbed.
    pub async fn run(self) -> Result<LoopOutcome, DownloadError> {
        let mut state = DownloadState::Idle;
        let mut saved_paths = Vec::new();
        let mut completed = 0u32;

        if self.max_items == 0 {
            self.enter(&mut state, DownloadState::Done);
            return Ok(LoopOutcome {
                completed,
                saved_paths,
                last_state: state,
            });
        }

        self.enter(&mut state, DownloadState::OpenFirstItem);
        if let Err(e) = self.driver.open_first_item().await {
            LOOP_SETUP_FAILURES.inc();
            error!(session = %self.session_id, "Cannot open first feed item: {}", e);
            return Err(match e {
                DownloadError::Setup(_) => e,
                other => DownloadError::Setup(other.to_string()),
            });
        }
        self.enter(&mut state, DownloadState::WaitItemReady);

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut consecutive_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                info!(
                    session = %self.session_id,
                    "Download loop cancelled after {}/{} items",
                    completed,
                    self.max_items
                );
                break;
            }

            if self.recovery.take() {
                warn!(session = %self.session_id, "Re-acquiring session after watchdog timeout");
                if let Err(e) = self.driver.recover().await {
                    error!(session = %self.session_id, "Session recovery failed: {}", e);
                    return Err(match e {
                        DownloadError::Recovery(_) => e,
                        other => DownloadError::Recovery(other.to_string()),
                    });
                }
                self.beat();
            }

            let started = Instant::now();
            match self.acquire_item(&mut state, &claimed).await {
                Ok(saved) => {
                    consecutive_failures = 0;
                    let path = self.claim(&saved.path).await;
                    claimed.insert(saved.path.clone());
                    claimed.insert(path.clone());
                    completed += 1;

                    let elapsed = started.elapsed();
                    ITEMS_DOWNLOADED
                        .with_label_values(&[self.session_id.as_str()])
                        .inc();
                    ITEM_ACQUISITION_DURATION
                        .with_label_values(&[])
                        .observe(elapsed.as_secs_f64());
                    info!(
                        session = %self.session_id,
                        item = completed,
                        size = saved.size,
                        "Saved {} ({} bytes) in {:.1}s",
                        path.display(),
                        saved.size,
                        elapsed.as_secs_f64()
                    );
                    saved_paths.push(path);

                    if completed >= self.max_items {
                        self.enter(&mut state, DownloadState::Done);
                        break;
                    }

                    self.enter(&mut state, DownloadState::AdvanceFeed);
                    if !self.driver.advance_feed().await {
                        let e = DownloadError::FeedAdvanceFailed;
                        ITERATION_FAILURES.with_label_values(&[e.kind()]).inc();
                        warn!(
                            session = %self.session_id,
                            "{}, stopping with {}/{} items",
                            e,
                            completed,
                            self.max_items
                        );
                        break;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    ITERATION_FAILURES.with_label_values(&[e.kind()]).inc();
                    warn!(
                        session = %self.session_id,
                        state = %state,
                        "Item {} failed: {}",
                        completed + 1,
                        e
                    );

                    let limit = self.config.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        error!(
                            session = %self.session_id,
                            "Giving up after {} consecutive failed items",
                            consecutive_failures
                        );
                        break;
                    }

                    self.enter(&mut state, DownloadState::AdvanceFeed);
                    if !self.driver.advance_feed().await {
                        let e = DownloadError::FeedAdvanceFailed;
                        ITERATION_FAILURES.with_label_values(&[e.kind()]).inc();
                        error!(
                            session = %self.session_id,
                            "Could not move past failed item ({}), stopping with {}/{} items",
                            e,
                            completed,
                            self.max_items
                        );
                        break;
                    }
                }
            }

            self.enter(&mut state, DownloadState::WaitItemReady);
        }

        Ok(LoopOutcome {
            completed,
            saved_paths,
            last_state: state,
        })
    }

    /// Ready, export, and wait for one saved file.
    async fn acquire_item(
        &self,
        state: &mut DownloadState,
        claimed: &HashSet<PathBuf>,
    ) -> Result<SavedFile, DownloadError> {
        self.driver.wait_item_ready().await?;

        self.enter(state, DownloadState::StartExport);
        let before = snapshot_dir(self.fs.as_ref(), &self.download_dir).await;
        let started_at = SystemTime::now();
        self.driver.trigger_export().await?;

        self.enter(state, DownloadState::WaitExportStart);
        let entry = wait_for_new_entry(
            self.fs.as_ref(),
            &self.download_dir,
            &before,
            self.config.export_start_polling(),
        )
        .await
        .map_err(|t| DownloadError::ExportStartTimeout(t.elapsed))?;
        debug!(session = %self.session_id, "Export started: {}", entry.display());

        self.enter(state, DownloadState::WaitFileSaved);
        let criteria = SaveCriteria {
            extension: &self.config.extension,
            modified_since: started_at,
            exclude: claimed,
            require_stable_size: self.config.require_stable_size,
        };
        wait_for_saved_file(
            self.fs.as_ref(),
            &self.download_dir,
            criteria,
            self.config.file_save_polling(),
        )
        .await
        .map_err(|t| DownloadError::FileSaveTimeout(t.elapsed))
    }

    /// Final path of a saved file, renamed with the session prefix if configured.
    async fn claim(&self, path: &Path) -> PathBuf {
        if !self.config.prefix_with_session || self.session_id.is_empty() {
            return path.to_path_buf();
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return path.to_path_buf();
        };
        let prefix = format!("{}_", self.session_id);
        if name.starts_with(&prefix) {
            return path.to_path_buf();
        }

        let target = path.with_file_name(format!("{}{}", prefix, name));
        match self.fs.rename(path, &target).await {
            Ok(()) => target,
            Err(e) => {
                warn!(session = %self.session_id, "Keeping original name for {}: {}", path.display(), e);
                path.to_path_buf()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFileSystem, ScriptedDriver};
    use crate::watchdog::{WatchdogOptions, WatchdogRegistry};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use tokio::time::Duration;

    const DIR: &str = "/downloads/s1";

    fn setup() -> (MockFileSystem, Arc<ScriptedDriver>) {
        let fs = MockFileSystem::new();
        fs.add_dir(DIR);
        let driver = Arc::new(ScriptedDriver::new(fs.clone(), DIR));
        (fs, driver)
    }

    fn download_loop(fs: &MockFileSystem, driver: &Arc<ScriptedDriver>, max_items: u32) -> DownloadLoop {
        DownloadLoop::new(
            driver.clone() as Arc<dyn DownloadDriver>,
            Arc::new(fs.clone()) as Arc<dyn FileSystem>,
            DownloadConfig::default(),
            DIR,
            max_items,
        )
        .session_id("s1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_items_one_file_each() {
        let (fs, driver) = setup();

        let outcome = download_loop(&fs, &driver, 3).run().await.unwrap();

        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.last_state, DownloadState::Done);
        assert_eq!(outcome.saved_paths.len(), 3);
        assert_eq!(outcome.saved_paths[0], PathBuf::from(DIR).join("item-1.mp4"));
        assert_eq!(outcome.saved_paths[2], PathBuf::from(DIR).join("item-3.mp4"));
        // No advance after the last item.
        assert_eq!(driver.advance_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_items_is_done_without_touching_browser() {
        let (fs, driver) = setup();

        let outcome = download_loop(&fs, &driver, 0).run().await.unwrap();

        assert_eq!(outcome.completed, 0);
        assert!(outcome.is_done());
        assert_eq!(driver.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_is_fatal() {
        let (fs, driver) = setup();
        driver.fail_open();

        let err = download_loop(&fs, &driver, 3).run().await.unwrap_err();

        assert!(matches!(err, DownloadError::Setup(_)));
        assert_eq!(driver.export_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_feed_terminates_with_partial_results() {
        let (fs, driver) = setup();
        driver.set_advance_result(false);

        let outcome = download_loop(&fs, &driver, 3).run().await.unwrap();

        assert_eq!(outcome.completed, 1);
        assert!(outcome.completed < 3);
        assert_ne!(outcome.last_state, DownloadState::Done);
        assert_eq!(driver.advance_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_feed_counted_as_feed_advance_failure() {
        let (fs, driver) = setup();
        driver.set_advance_result(false);
        let counter = ITERATION_FAILURES.with_label_values(&["feed_advance_failed"]);
        let before = counter.get();

        download_loop(&fs, &driver, 2).run().await.unwrap();

        assert!(counter.get() >= before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recovery_advance_terminates() {
        let (fs, driver) = setup();
        driver.fail_export(1);
        driver.set_advance_result(false);

        let outcome = download_loop(&fs, &driver, 3).run().await.unwrap();

        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.last_state, DownloadState::AdvanceFeed);
        assert_eq!(driver.export_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_failure_advances_and_continues() {
        let (fs, driver) = setup();
        driver.fail_export(2);

        let outcome = download_loop(&fs, &driver, 3).run().await.unwrap();

        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.last_state, DownloadState::Done);
        assert_eq!(driver.export_count(), 4);
        // One advance per saved item plus one past the failed item.
        assert_eq!(driver.advance_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_that_never_starts_times_out() {
        let (fs, driver) = setup();
        driver.silent_export(1);

        let mut config = DownloadConfig::default();
        config.export_start_timeout_ms = 2_000;
        let started = Instant::now();
        let outcome = DownloadLoop::new(
            driver.clone() as Arc<dyn DownloadDriver>,
            Arc::new(fs.clone()) as Arc<dyn FileSystem>,
            config,
            DIR,
            1,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(driver.export_count(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_are_capped() {
        let (fs, driver) = setup();
        for n in 1..=10 {
            driver.fail_export(n);
        }

        let outcome = download_loop(&fs, &driver, 3).run().await.unwrap();

        assert_eq!(outcome.completed, 0);
        assert_eq!(
            driver.export_count(),
            DownloadConfig::default().max_consecutive_failures
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_checked_once_per_iteration() {
        let (fs, driver) = setup();
        let cancel = CancelFlag::new();

        let observer = cancel.clone();
        let outcome = download_loop(&fs, &driver, 5)
            .cancel_flag(cancel)
            .on_state_change(Arc::new(move |state| {
                if state == DownloadState::WaitFileSaved {
                    observer.cancel();
                }
            }))
            .run()
            .await
            .unwrap();

        // The in-flight item still completes.
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.last_state, DownloadState::WaitItemReady);
        assert_eq!(driver.export_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_request_reacquires_session() {
        let (fs, driver) = setup();
        let recovery = RecoverySignal::new();
        recovery.request();

        let outcome = download_loop(&fs, &driver, 1)
            .recovery(recovery.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(driver.recover_count(), 1);
        assert!(!recovery.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recovery_ends_loop() {
        let (fs, driver) = setup();
        driver.fail_recover();
        let recovery = RecoverySignal::new();
        recovery.request();

        let err = download_loop(&fs, &driver, 1)
            .recovery(recovery)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Recovery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_files_renamed_with_session_prefix() {
        let (fs, driver) = setup();
        let config = DownloadConfig {
            prefix_with_session: true,
            ..Default::default()
        };

        let outcome = DownloadLoop::new(
            driver.clone() as Arc<dyn DownloadDriver>,
            Arc::new(fs.clone()) as Arc<dyn FileSystem>,
            config,
            DIR,
            2,
        )
        .session_id("s1")
        .run()
        .await
        .unwrap();

        let dir = PathBuf::from(DIR);
        assert_eq!(
            outcome.saved_paths,
            vec![dir.join("s1_item-1.mp4"), dir.join("s1_item-2.mp4")]
        );
        assert!(fs.exists(&dir.join("s1_item-2.mp4")));
        assert!(!fs.exists(&dir.join("item-1.mp4")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_states_follow_declared_order() {
        let (fs, driver) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        download_loop(&fs, &driver, 2)
            .on_state_change(Arc::new(move |state| sink.lock().unwrap().push(state)))
            .run()
            .await
            .unwrap();

        use DownloadState::*;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                OpenFirstItem,
                WaitItemReady,
                StartExport,
                WaitExportStart,
                WaitFileSaved,
                AdvanceFeed,
                WaitItemReady,
                StartExport,
                WaitExportStart,
                WaitFileSaved,
                Done,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_keep_watchdog_quiet() {
        let (fs, driver) = setup();
        driver.set_ready_delay(Duration::from_millis(600));

        let registry = WatchdogRegistry::new();
        let timeouts = Arc::new(AtomicU32::new(0));
        let counter = timeouts.clone();
        let guard = registry
            .start(
                "s1-run",
                WatchdogOptions {
                    timeout: Duration::from_millis(1_000),
                    escalation_threshold: 3,
                    cancel: CancelFlag::new(),
                },
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let outcome = download_loop(&fs, &driver, 3)
            .watchdog(guard.handle())
            .run()
            .await
            .unwrap();
        drop(guard);

        assert_eq!(outcome.completed, 3);
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        assert!(!registry.is_active("s1-run"));
    }
}
