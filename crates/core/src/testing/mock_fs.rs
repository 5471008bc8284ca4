//! In-memory filesystem for testing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::fs::{FileMeta, FileSystem, FsError};

#[derive(Debug, Clone)]
struct MockFile {
    size: u64,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<PathBuf, MockFile>,
    dirs: BTreeSet<PathBuf>,
    renames: Vec<(PathBuf, PathBuf)>,
}

/// Mock implementation of the [`FileSystem`] trait.
///
/// Clones share the same tree, so a test can hand one clone to the code under
/// test and keep another to play the external writer.
///
/// ```rust,ignore
/// let fs = MockFileSystem::new();
/// fs.add_file("/downloads/a.mp4", 1024);
/// fs.set_size(Path::new("/downloads/a.mp4"), 2048);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<State>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an (empty) directory.
    pub fn add_dir(&self, dir: impl Into<PathBuf>) {
        self.lock().dirs.insert(dir.into());
    }

    /// Add or replace a file modified now.
    pub fn add_file(&self, path: impl Into<PathBuf>, size: u64) {
        self.add_file_modified(path, size, SystemTime::now());
    }

    /// Add or replace a file with an explicit modification time.
    pub fn add_file_modified(&self, path: impl Into<PathBuf>, size: u64, modified: SystemTime) {
        let path = path.into();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            state.dirs.insert(parent.to_path_buf());
        }
        state.files.insert(path, MockFile { size, modified });
    }

    /// Change a file's size, as a writer still flushing it would.
    pub fn set_size(&self, path: &Path, size: u64) {
        if let Some(file) = self.lock().files.get_mut(path) {
            file.size = size;
            file.modified = SystemTime::now();
        }
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.lock().files.remove(path).is_some()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Files directly inside `dir`, sorted.
    pub fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        self.lock()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect()
    }

    /// All renames performed, in order.
    pub fn renames(&self) -> Vec<(PathBuf, PathBuf)> {
        self.lock().renames.clone()
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(FsError::NotFound(dir.to_path_buf()));
        }
        Ok(state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }

    async fn stat(&self, path: &Path) -> Result<FileMeta, FsError> {
        let state = self.lock();
        if let Some(file) = state.files.get(path) {
            return Ok(FileMeta {
                size: file.size,
                modified: file.modified,
                is_file: true,
            });
        }
        if state.dirs.contains(path) {
            return Ok(FileMeta {
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
                is_file: false,
            });
        }
        Err(FsError::NotFound(path.to_path_buf()))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut state = self.lock();
        let file = state
            .files
            .remove(from)
            .ok_or_else(|| FsError::NotFound(from.to_path_buf()))?;
        if let Some(parent) = to.parent() {
            state.dirs.insert(parent.to_path_buf());
        }
        state.files.insert(to.to_path_buf(), file);
        state.renames.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<(), FsError> {
        let mut state = self.lock();
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
}
