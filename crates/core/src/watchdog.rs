//! Liveness watchdog with soft escalation.
//!
//! Each monitored run gets a timer task that fires when no heartbeat has been
//! recorded for the configured timeout. Timeouts below the escalation
//! threshold are reported to the caller, who is expected to recover the
//! session. Reaching the threshold sets the run's [`CancelFlag`] exactly once.
//!
//! Entries are keyed by run identifier and removed when the [`WatchdogGuard`]
//! returned by [`WatchdogRegistry::start`] is dropped, so a finished run never
//! leaves a timer behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::heartbeat::HeartbeatRegistry;
use crate::metrics::{WATCHDOG_ESCALATIONS, WATCHDOG_TIMEOUTS};

/// Errors from the watchdog registry.
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// A run with this identifier is already monitored.
    #[error("watchdog already active for run: {0}")]
    AlreadyActive(String),
}

/// Notification delivered on every missed heartbeat period.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogEvent {
    pub run_id: String,
    /// Timeouts since the last heartbeat, including this one.
    pub consecutive: u32,
    pub threshold: u32,
    /// True only for the timeout that set the cancel flag.
    pub escalated: bool,
}

impl WatchdogEvent {
    /// Whether the caller should try to recover the session.
    pub fn is_recoverable(&self) -> bool {
        self.consecutive < self.threshold
    }
}

/// Callback invoked from the timer task on each timeout.
pub type TimeoutCallback = Arc<dyn Fn(&WatchdogEvent) + Send + Sync>;

/// Parameters for one monitored run.
#[derive(Debug, Clone)]
pub struct WatchdogOptions {
    pub timeout: Duration,
    /// Consecutive timeouts that trigger cancellation (at least 1).
    pub escalation_threshold: u32,
    /// Flag set on escalation.
    pub cancel: CancelFlag,
}

struct WatchdogEntry {
    consecutive: u32,
    escalated: bool,
    task: Option<JoinHandle<()>>,
}

/// Process-wide registry of monitored runs.
#[derive(Clone, Default)]
pub struct WatchdogRegistry {
    heartbeats: HeartbeatRegistry,
    entries: Arc<Mutex<HashMap<String, WatchdogEntry>>>,
}

impl WatchdogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WatchdogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a watchdog for `run_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        run_id: &str,
        options: WatchdogOptions,
        on_timeout: TimeoutCallback,
    ) -> Result<WatchdogGuard, WatchdogError> {
        {
            let mut entries = self.lock();
            if entries.contains_key(run_id) {
                return Err(WatchdogError::AlreadyActive(run_id.to_string()));
            }
            entries.insert(
                run_id.to_string(),
                WatchdogEntry {
                    consecutive: 0,
                    escalated: false,
                    task: None,
                },
            );
        }
        self.heartbeats.register(run_id);

        let task = tokio::spawn(Self::timer_loop(
            self.clone(),
            run_id.to_string(),
            options,
            on_timeout,
        ));

        if let Some(entry) = self.lock().get_mut(run_id) {
            entry.task = Some(task);
        } else {
            // Stopped before the handle could be stored.
            task.abort();
        }

        debug!(run_id = %run_id, "Watchdog armed");

        Ok(WatchdogGuard {
            handle: WatchdogHandle {
                registry: self.clone(),
                run_id: run_id.to_string(),
            },
        })
    }

    /// Record a heartbeat and reset the consecutive-timeout counter.
    pub fn heartbeat(&self, run_id: &str) -> bool {
        if !self.heartbeats.beat(run_id) {
            return false;
        }
        if let Some(entry) = self.lock().get_mut(run_id) {
            entry.consecutive = 0;
        }
        true
    }

    /// Disarm the watchdog for `run_id`. Safe to call more than once.
    pub fn stop(&self, run_id: &str) {
        let entry = self.lock().remove(run_id);
        self.heartbeats.remove(run_id);
        if let Some(entry) = entry {
            if let Some(task) = entry.task {
                task.abort();
            }
            debug!(run_id = %run_id, "Watchdog stopped");
        }
    }

    /// Whether `run_id` is currently monitored.
    pub fn is_active(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    /// Number of monitored runs.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Consecutive timeouts recorded for `run_id`.
    pub fn consecutive_timeouts(&self, run_id: &str) -> Option<u32> {
        self.lock().get(run_id).map(|e| e.consecutive)
    }

    /// Record one timeout. Returns `None` if the run is no longer monitored.
    fn record_timeout(&self, run_id: &str, threshold: u32) -> Option<WatchdogEvent> {
        let mut entries = self.lock();
        let entry = entries.get_mut(run_id)?;
        entry.consecutive = entry.consecutive.saturating_add(1);
        let escalated = !entry.escalated && entry.consecutive >= threshold;
        if escalated {
            entry.escalated = true;
        }
        Some(WatchdogEvent {
            run_id: run_id.to_string(),
            consecutive: entry.consecutive,
            threshold,
            escalated,
        })
    }

    async fn timer_loop(
        registry: WatchdogRegistry,
        run_id: String,
        options: WatchdogOptions,
        on_timeout: TimeoutCallback,
    ) {
        let threshold = options.escalation_threshold.max(1);
        let mut last_fired: Option<Instant> = None;

        loop {
            let Some(last_beat) = registry.heartbeats.last_beat(&run_id) else {
                return;
            };
            let armed_at = match last_fired {
                Some(fired) if fired > last_beat => fired,
                _ => last_beat,
            };
            let deadline = armed_at + options.timeout;

            if Instant::now() < deadline {
                tokio::time::sleep_until(deadline).await;
                continue;
            }

            last_fired = Some(Instant::now());
            let Some(event) = registry.record_timeout(&run_id, threshold) else {
                return;
            };

            WATCHDOG_TIMEOUTS.inc();
            if event.escalated {
                WATCHDOG_ESCALATIONS.inc();
                options.cancel.cancel();
                warn!(
                    run_id = %run_id,
                    consecutive = event.consecutive,
                    "Watchdog escalation threshold reached, cancelling run"
                );
            } else {
                warn!(
                    run_id = %run_id,
                    consecutive = event.consecutive,
                    threshold,
                    "Watchdog timeout, no heartbeat for {:?}",
                    options.timeout
                );
            }

            on_timeout(&event);
        }
    }
}

/// Cheap handle for sending heartbeats for one run.
#[derive(Clone)]
pub struct WatchdogHandle {
    registry: WatchdogRegistry,
    run_id: String,
}

impl WatchdogHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn heartbeat(&self) {
        self.registry.heartbeat(&self.run_id);
    }
}

/// Disarms the watchdog when dropped.
pub struct WatchdogGuard {
    handle: WatchdogHandle,
}

impl WatchdogGuard {
    pub fn handle(&self) -> WatchdogHandle {
        self.handle.clone()
    }

    pub fn run_id(&self) -> &str {
        self.handle.run_id()
    }
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.handle.registry.stop(&self.handle.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(timeout_ms: u64, threshold: u32, cancel: &CancelFlag) -> WatchdogOptions {
        WatchdogOptions {
            timeout: Duration::from_millis(timeout_ms),
            escalation_threshold: threshold,
            cancel: cancel.clone(),
        }
    }

    fn recording_callback() -> (TimeoutCallback, Arc<Mutex<Vec<WatchdogEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: TimeoutCallback = Arc::new(move |event: &WatchdogEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        (callback, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_without_heartbeat() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let (callback, events) = recording_callback();

        let _guard = registry
            .start("run-1", options(1000, 3, &cancel), callback)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].consecutive, 1);
        assert!(events[0].is_recoverable());
        assert!(!events[0].escalated);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_run_alive() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let (callback, events) = recording_callback();

        let guard = registry
            .start("run-1", options(1000, 2, &cancel), callback)
            .unwrap();
        let handle = guard.handle();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(600)).await;
            handle.heartbeat();
        }

        assert!(events.lock().unwrap().is_empty());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_sets_cancel_exactly_once() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let (callback, events) = recording_callback();

        let _guard = registry
            .start("run-1", options(1000, 3, &cancel), callback)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!cancel.is_cancelled());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(cancel.is_cancelled());

        // Keep missing heartbeats well past the threshold.
        tokio::time::sleep(Duration::from_millis(5000)).await;

        let events = events.lock().unwrap();
        assert!(events.len() > 3);
        let escalations = events.iter().filter(|e| e.escalated).count();
        assert_eq!(escalations, 1);
        assert_eq!(events.iter().position(|e| e.escalated), Some(2));
        assert!(!events[0].escalated && events[0].is_recoverable());
        assert!(!events[1].escalated && events[1].is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_resets_consecutive_counter() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let (callback, _events) = recording_callback();

        let guard = registry
            .start("run-1", options(1000, 2, &cancel), callback)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(registry.consecutive_timeouts("run-1"), Some(1));

        guard.handle().heartbeat();
        assert_eq!(registry.consecutive_timeouts("run-1"), Some(0));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(registry.consecutive_timeouts("run-1"), Some(1));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_drop_removes_entry_and_timer() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let callback: TimeoutCallback = Arc::new(move |_: &WatchdogEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let guard = registry
            .start("run-1", options(1000, 1, &cancel), callback)
            .unwrap();
        assert!(registry.is_active("run-1"));
        drop(guard);

        assert!(!registry.is_active("run-1"));
        assert_eq!(registry.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_run_id_rejected() {
        let registry = WatchdogRegistry::new();
        let cancel = CancelFlag::new();
        let (callback, _events) = recording_callback();

        let _guard = registry
            .start("run-1", options(1000, 1, &cancel), Arc::clone(&callback))
            .unwrap();
        let second = registry.start("run-1", options(1000, 1, &cancel), callback);
        assert!(matches!(second, Err(WatchdogError::AlreadyActive(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_do_not_alias() {
        let registry = WatchdogRegistry::new();
        let cancel_a = CancelFlag::new();
        let cancel_b = CancelFlag::new();
        let (callback, _events) = recording_callback();

        let _a = registry
            .start("run-a", options(1000, 1, &cancel_a), Arc::clone(&callback))
            .unwrap();
        let b = registry
            .start("run-b", options(1000, 1, &cancel_b), callback)
            .unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            b.handle().heartbeat();
        }

        assert!(cancel_a.is_cancelled());
        assert!(!cancel_b.is_cancelled());
    }
}
