//! Scripted download driver for testing the download loop and pipelines.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Duration;

use crate::download::{DownloadDriver, DownloadError};

use super::MockFileSystem;

#[derive(Debug, Default)]
struct Script {
    open_fails: bool,
    recover_fails: bool,
    failing_exports: HashSet<u32>,
    silent_exports: HashSet<u32>,
    advance_results: VecDeque<bool>,
    advance_default: bool,
    ready_delay: Duration,
    opens: u32,
    exports: u32,
    advances: u32,
    recoveries: u32,
}

/// Mock implementation of the [`DownloadDriver`] trait.
///
/// Each successful export writes `item-<n>.<ext>` into the download directory
/// of the shared [`MockFileSystem`], where `n` counts export attempts from 1.
/// Failures are scripted per attempt number.
///
/// ```rust,ignore
/// let fs = MockFileSystem::new();
/// let driver = ScriptedDriver::new(fs.clone(), "/downloads/s1");
/// driver.fail_export(2);
/// driver.set_advance_result(false);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    fs: MockFileSystem,
    dir: PathBuf,
    extension: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
    pub fn new(fs: MockFileSystem, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
            extension: "mp4".to_string(),
            script: Arc::new(Mutex::new(Script {
                advance_default: true,
                ..Default::default()
            })),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_open(&self) {
        self.lock().open_fails = true;
    }

    pub fn fail_recover(&self) {
        self.lock().recover_fails = true;
    }

    /// Export attempt `n` (1-based) fails to find a trigger.
    pub fn fail_export(&self, n: u32) {
        self.lock().failing_exports.insert(n);
    }

    /// Export attempt `n` (1-based) reports success but writes nothing.
    pub fn silent_export(&self, n: u32) {
        self.lock().silent_exports.insert(n);
    }

    /// Result of every advance without a queued result.
    pub fn set_advance_result(&self, moved: bool) {
        self.lock().advance_default = moved;
    }

    /// Queue the result of the next advance.
    pub fn push_advance_result(&self, moved: bool) {
        self.lock().advance_results.push_back(moved);
    }

    /// Time spent waiting for each item to become ready.
    pub fn set_ready_delay(&self, delay: Duration) {
        self.lock().ready_delay = delay;
    }

    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    pub fn export_count(&self) -> u32 {
        self.lock().exports
    }

    pub fn advance_count(&self) -> u32 {
        self.lock().advances
    }

    pub fn recover_count(&self) -> u32 {
        self.lock().recoveries
    }
}

#[async_trait]
impl DownloadDriver for ScriptedDriver {
    async fn open_first_item(&self) -> Result<(), DownloadError> {
        let mut script = self.lock();
        script.opens += 1;
        if script.open_fails {
            return Err(DownloadError::Setup("no feed item".to_string()));
        }
        Ok(())
    }

    async fn wait_item_ready(&self) -> Result<(), DownloadError> {
        let delay = self.lock().ready_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn trigger_export(&self) -> Result<(), DownloadError> {
        let (n, fails, silent) = {
            let mut script = self.lock();
            script.exports += 1;
            let n = script.exports;
            (
                n,
                script.failing_exports.contains(&n),
                script.silent_exports.contains(&n),
            )
        };
        if fails {
            return Err(DownloadError::ExportTriggerNotFound);
        }
        if !silent {
            self.fs.add_file(
                self.dir.join(format!("item-{}.{}", n, self.extension)),
                1024,
            );
        }
        Ok(())
    }

    async fn advance_feed(&self) -> bool {
        let mut script = self.lock();
        script.advances += 1;
        let default = script.advance_default;
        script.advance_results.pop_front().unwrap_or(default)
    }

    async fn recover(&self) -> Result<(), DownloadError> {
        let mut script = self.lock();
        script.recoveries += 1;
        if script.recover_fails {
            return Err(DownloadError::Recovery("page gone".to_string()));
        }
        Ok(())
    }
}
