//! Polling primitives.
//!
//! The output directory is written by an external process with no way to be
//! notified, so completion is detected by re-checking a predicate on a fixed
//! interval until a deadline. Every wait in the download loop goes through
//! [`poll_until`].

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::fs::{extension_of, FileSystem};

/// Interval and deadline for a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }
}

/// The predicate never held before the deadline.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("condition not met within {elapsed:?}")]
pub struct PollTimeout {
    pub elapsed: Duration,
}

/// Call `probe` every `interval` until it yields a value or `timeout` passes.
///
/// The probe always runs at least once, even with a zero timeout.
pub async fn poll_until<T, F, Fut>(settings: PollSettings, mut probe: F) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let deadline = start + settings.timeout;

    loop {
        if let Some(value) = probe().await {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                elapsed: now - start,
            });
        }

        let remaining = deadline - now;
        tokio::time::sleep(settings.interval.min(remaining)).await;
    }
}

/// Current entries of `dir`. A missing or unreadable directory is empty.
pub async fn snapshot_dir(fs: &dyn FileSystem, dir: &Path) -> HashSet<PathBuf> {
    match fs.list_dir(dir).await {
        Ok(entries) => entries.into_iter().collect(),
        Err(e) => {
            debug!("Snapshot of {} failed, treating as empty: {}", dir.display(), e);
            HashSet::new()
        }
    }
}

/// Wait for any entry of `dir` that is not in `before`.
pub async fn wait_for_new_entry(
    fs: &dyn FileSystem,
    dir: &Path,
    before: &HashSet<PathBuf>,
    settings: PollSettings,
) -> Result<PathBuf, PollTimeout> {
    poll_until(settings, || async {
        let entries = fs.list_dir(dir).await.ok()?;
        entries.into_iter().find(|entry| !before.contains(entry))
    })
    .await
}

/// What counts as a saved output file.
#[derive(Debug, Clone)]
pub struct SaveCriteria<'a> {
    /// Expected extension, with or without a leading dot.
    pub extension: &'a str,
    /// Only files modified at or after this time qualify.
    pub modified_since: SystemTime,
    /// Paths already claimed by earlier items.
    pub exclude: &'a HashSet<PathBuf>,
    /// Require the same size on two consecutive polls.
    pub require_stable_size: bool,
}

/// A file accepted as saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Most recently modified file in `dir` matching `criteria`, if any.
async fn newest_match(
    fs: &dyn FileSystem,
    dir: &Path,
    criteria: &SaveCriteria<'_>,
) -> Option<SavedFile> {
    let wanted = criteria.extension.trim_start_matches('.').to_ascii_lowercase();
    let entries = fs.list_dir(dir).await.ok()?;

    let mut best: Option<SavedFile> = None;
    for path in entries {
        if criteria.exclude.contains(&path) {
            continue;
        }
        if extension_of(&path).as_deref() != Some(wanted.as_str()) {
            continue;
        }
        let Ok(meta) = fs.stat(&path).await else {
            continue;
        };
        if !meta.is_file || meta.modified < criteria.modified_since {
            continue;
        }
        let newer = best
            .as_ref()
            .map(|b| meta.modified > b.modified)
            .unwrap_or(true);
        if newer {
            best = Some(SavedFile {
                path,
                size: meta.size,
                modified: meta.modified,
            });
        }
    }
    best
}

/// Wait for a file in `dir` that satisfies `criteria`.
///
/// Among qualifying files the most recently modified one wins. Without the
/// stable-size check the first qualifying match is accepted even if the
/// writer is still flushing it.
pub async fn wait_for_saved_file(
    fs: &dyn FileSystem,
    dir: &Path,
    criteria: SaveCriteria<'_>,
    settings: PollSettings,
) -> Result<SavedFile, PollTimeout> {
    let previous: Mutex<Option<(PathBuf, u64)>> = Mutex::new(None);
    let criteria = &criteria;
    let previous = &previous;

    poll_until(settings, || async move {
        let candidate = newest_match(fs, dir, criteria).await?;
        if !criteria.require_stable_size {
            return Some(candidate);
        }

        let mut last = previous.lock().unwrap_or_else(|e| e.into_inner());
        let stable = matches!(
            last.as_ref(),
            Some((path, size)) if *path == candidate.path && *size == candidate.size
        );
        if stable {
            Some(candidate)
        } else {
            *last = Some((candidate.path.clone(), candidate.size));
            None
        }
    })
    .await
}
