//! Download acquisition.
//!
//! A per-session loop that opens a feed item, triggers its export, detects the
//! saved file purely by watching the download directory, and advances the
//! feed. Browser specifics live behind [`DownloadDriver`] so the loop itself
//! only sequences states and applies the recovery policy.

mod config;
mod driver;
mod error;
mod machine;
mod state;

pub use config::DownloadConfig;
pub use driver::{BrowserDriver, DownloadDriver};
pub use error::DownloadError;
pub use machine::{DownloadLoop, LoopOutcome, RecoverySignal, StateCallback};
pub use state::DownloadState;
