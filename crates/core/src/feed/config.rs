//! Feed navigator configuration.

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::browser::Key;

/// Configuration for advancing the content feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorConfig {
    /// Wheel delta of the primary gesture, in pixels.
    #[serde(default = "default_scroll_delta")]
    pub scroll_delta: i64,

    /// Key pressed as the secondary gesture.
    #[serde(default = "default_next_key")]
    pub next_key: Key,

    /// How long to watch for a signature change after each scroll (milliseconds).
    #[serde(default = "default_change_timeout")]
    pub change_timeout_ms: u64,

    /// Signature polling interval (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Primary/secondary gesture pairs to try.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wall-clock budget for one advance (milliseconds).
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_ms: u64,

    /// Pause after a detected move, letting the new item settle (milliseconds).
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

fn default_scroll_delta() -> i64 {
    800
}

fn default_next_key() -> Key {
    Key::ArrowDown
}

fn default_change_timeout() -> u64 {
    2500
}

fn default_poll_interval() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    4
}

fn default_overall_timeout() -> u64 {
    15_000
}

fn default_settle() -> u64 {
    600
}

impl NavigatorConfig {
    pub fn change_timeout(&self) -> Duration {
        Duration::from_millis(self.change_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            scroll_delta: default_scroll_delta(),
            next_key: default_next_key(),
            change_timeout_ms: default_change_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            overall_timeout_ms: default_overall_timeout(),
            settle_ms: default_settle(),
        }
    }
}
