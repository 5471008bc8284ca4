//! Last-alive timestamps per running task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::{Duration, Instant};

/// Tracks the most recent heartbeat of every registered run.
///
/// Cloning yields a handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatRegistry {
    beats: Arc<Mutex<HashMap<String, Instant>>>,
}

impl HeartbeatRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // A panic while holding the lock cannot leave a timestamp half-written.
        self.beats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a run with the current time as its first heartbeat.
    pub fn register(&self, run_id: &str) {
        self.lock().insert(run_id.to_string(), Instant::now());
    }

    /// Record a heartbeat. Returns `false` if the run is not registered.
    pub fn beat(&self, run_id: &str) -> bool {
        match self.lock().get_mut(run_id) {
            Some(last) => {
                *last = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Time of the last heartbeat, if the run is registered.
    pub fn last_beat(&self, run_id: &str) -> Option<Instant> {
        self.lock().get(run_id).copied()
    }

    /// Time elapsed since the last heartbeat.
    pub fn since_last_beat(&self, run_id: &str) -> Option<Duration> {
        self.last_beat(run_id).map(|t| t.elapsed())
    }

    /// Remove a run. Returns `true` if it was registered.
    pub fn remove(&self, run_id: &str) -> bool {
        self.lock().remove(run_id).is_some()
    }

    /// Whether a run is registered.
    pub fn contains(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    /// Number of registered runs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_beat_refreshes_timestamp() {
        let registry = HeartbeatRegistry::new();
        registry.register("run-1");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            registry.since_last_beat("run-1"),
            Some(Duration::from_secs(5))
        );

        assert!(registry.beat("run-1"));
        assert_eq!(registry.since_last_beat("run-1"), Some(Duration::ZERO));
    }

    #[test]
    fn test_beat_unknown_run() {
        let registry = HeartbeatRegistry::new();
        assert!(!registry.beat("missing"));
        assert!(registry.last_beat("missing").is_none());
    }

    #[test]
    fn test_remove() {
        let registry = HeartbeatRegistry::new();
        registry.register("a");
        registry.register("b");
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
    }
}
