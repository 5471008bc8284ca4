//! Download loop configuration.

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::polling::PollSettings;

/// Timing and output settings for the download loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory polling interval (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Budget for each ready condition to become visible (milliseconds).
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,

    /// Fixed pause after the item is ready, absorbing UI animations (milliseconds).
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// How long to look for a single export control (milliseconds).
    #[serde(default = "default_control_timeout")]
    pub control_timeout_ms: u64,

    /// Deadline for any new entry to appear after triggering (milliseconds).
    #[serde(default = "default_export_start_timeout")]
    pub export_start_timeout_ms: u64,

    /// Deadline for the finished file (milliseconds).
    #[serde(default = "default_file_save_timeout")]
    pub file_save_timeout_ms: u64,

    /// Extension of finished output files.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Require the same size on two consecutive polls before accepting a file.
    #[serde(default = "default_true")]
    pub require_stable_size: bool,

    /// Rename saved files to `<session>_<name>`.
    #[serde(default)]
    pub prefix_with_session: bool,

    /// Consecutive failed iterations before the loop gives up (0 = never).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_poll_interval() -> u64 {
    500
}

fn default_ready_timeout() -> u64 {
    15_000
}

fn default_settle() -> u64 {
    800
}

fn default_control_timeout() -> u64 {
    3_000
}

fn default_export_start_timeout() -> u64 {
    30_000
}

fn default_file_save_timeout() -> u64 {
    180_000
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            ready_timeout_ms: default_ready_timeout(),
            settle_ms: default_settle(),
            control_timeout_ms: default_control_timeout(),
            export_start_timeout_ms: default_export_start_timeout(),
            file_save_timeout_ms: default_file_save_timeout(),
            extension: default_extension(),
            require_stable_size: default_true(),
            prefix_with_session: false,
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl DownloadConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn export_start_polling(&self) -> PollSettings {
        PollSettings::from_millis(self.poll_interval_ms, self.export_start_timeout_ms)
    }

    pub fn file_save_polling(&self) -> PollSettings {
        PollSettings::from_millis(self.poll_interval_ms, self.file_save_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloadConfig::default();
        assert_eq!(config.extension, "mp4");
        assert!(config.require_stable_size);
        assert!(!config.prefix_with_session);
        assert_eq!(
            config.file_save_polling(),
            PollSettings::from_millis(500, 180_000)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DownloadConfig = toml::from_str(
            r#"
            extension = "png"
            require_stable_size = false
            "#,
        )
        .unwrap();
        assert_eq!(config.extension, "png");
        assert!(!config.require_stable_size);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_consecutive_failures, 5);
    }
}
