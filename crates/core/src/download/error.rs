use thiserror::Error;
use tokio::time::Duration;

use crate::browser::BrowserError;

/// Errors raised while acquiring downloads.
///
/// Only [`DownloadError::Setup`] and [`DownloadError::Recovery`] end a loop;
/// the rest are iteration-level and handled by advancing the feed.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The first feed item could not be opened.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A ready condition never became visible.
    #[error("item not ready: '{0}' not visible")]
    ReadinessTimeout(String),

    /// No export control, menu entry, or label matched.
    #[error("export trigger not found")]
    ExportTriggerNotFound,

    /// Nothing new appeared in the download directory.
    #[error("export did not start within {0:?}")]
    ExportStartTimeout(Duration),

    /// No finished file appeared.
    #[error("file not saved within {0:?}")]
    FileSaveTimeout(Duration),

    /// The feed did not move to the next item.
    #[error("feed did not advance")]
    FeedAdvanceFailed,

    /// Re-acquiring the session after a watchdog timeout failed.
    #[error("session recovery failed: {0}")]
    Recovery(String),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

impl DownloadError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Setup(_) => "setup",
            DownloadError::ReadinessTimeout(_) => "readiness_timeout",
            DownloadError::ExportTriggerNotFound => "export_trigger_not_found",
            DownloadError::ExportStartTimeout(_) => "export_start_timeout",
            DownloadError::FileSaveTimeout(_) => "file_save_timeout",
            DownloadError::FeedAdvanceFailed => "feed_advance_failed",
            DownloadError::Recovery(_) => "recovery",
            DownloadError::Browser(_) => "browser",
        }
    }
}
