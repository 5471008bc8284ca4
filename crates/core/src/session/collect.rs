//! Post-processing handoff.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::fs::{FileSystem, FsError};

/// Receives every session's saved files once downloading is over.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Process `saved` (session id → files) and return the resulting paths.
    async fn process(&self, saved: &BTreeMap<String, Vec<PathBuf>>) -> anyhow::Result<Vec<PathBuf>>;
}

/// Moves saved files into one output directory.
///
/// Name clashes are resolved by prefixing the session id, then a counter.
pub struct MoveToDirectory {
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
}

impl MoveToDirectory {
    pub fn new(fs: Arc<dyn FileSystem>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
        }
    }

    async fn exists(&self, path: &Path) -> anyhow::Result<bool> {
        match self.fs.stat(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn free_target(&self, session: &str, name: &str) -> anyhow::Result<PathBuf> {
        let target = self.output_dir.join(name);
        if !self.exists(&target).await? {
            return Ok(target);
        }
        let prefixed = if name.starts_with(&format!("{}_", session)) {
            name.to_string()
        } else {
            format!("{}_{}", session, name)
        };
        let target = self.output_dir.join(&prefixed);
        if !self.exists(&target).await? {
            return Ok(target);
        }
        let mut n = 1;
        loop {
            let target = self.output_dir.join(format!("{}_{}", n, prefixed));
            if !self.exists(&target).await? {
                return Ok(target);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl PostProcessor for MoveToDirectory {
    async fn process(&self, saved: &BTreeMap<String, Vec<PathBuf>>) -> anyhow::Result<Vec<PathBuf>> {
        self.fs
            .create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("create {}", self.output_dir.display()))?;

        let mut moved = Vec::new();
        for (session, paths) in saved {
            for path in paths {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("unusable file name: {}", path.display()))?;
                let target = self.free_target(session, name).await?;
                self.fs
                    .rename(path, &target)
                    .await
                    .with_context(|| format!("move {}", path.display()))?;
                debug!(session = %session, "Collected {} -> {}", path.display(), target.display());
                moved.push(target);
            }
        }

        info!("Collected {} files into {}", moved.len(), self.output_dir.display());
        Ok(moved)
    }
}
