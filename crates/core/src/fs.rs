//! Filesystem collaborator.
//!
//! The download loop only observes the output directory through this trait,
//! which keeps the racy part of the design (files written by another process)
//! replaceable in tests.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// Any other I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Metadata of a single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
    pub is_file: bool,
}

/// Directory listing, stat and rename.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// List the entries of `dir` (full paths, not recursive).
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Stat a single path.
    async fn stat(&self, path: &Path) -> Result<FileMeta, FsError>;

    /// Rename `from` to `to`.
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Create `dir` and any missing parents.
    async fn create_dir_all(&self, dir: &Path) -> Result<(), FsError>;
}

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FsError::from_io(dir, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| FsError::from_io(dir, e))?
        {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<FileMeta, FsError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        let modified = meta.modified().map_err(|e| FsError::from_io(path, e))?;
        Ok(FileMeta {
            size: meta.len(),
            modified,
            is_file: meta.is_file(),
        })
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| FsError::from_io(from, e))
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FsError::from_io(dir, e))
    }
}

/// Lowercased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}
