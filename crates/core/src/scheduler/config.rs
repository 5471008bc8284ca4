use serde::{Deserialize, Serialize};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Steps allowed to run at once. `1` runs steps strictly in list order;
    /// larger values run independent ready steps concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

impl SchedulerConfig {
    pub fn is_sequential(&self) -> bool {
        self.max_parallel <= 1
    }
}
