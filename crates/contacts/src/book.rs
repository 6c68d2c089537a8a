//! Reloadable handle on the current contact directory.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use tracing::info;

use crate::directory::{ContactDirectory, DirectoryLoadError};

/// Shared, reloadable contact directory.
///
/// Readers get an `Arc` snapshot, so a reload never changes the directory
/// under an in-flight dispatch.
pub struct ContactBook {
    path: Option<PathBuf>,
    current: RwLock<Arc<ContactDirectory>>,
}

impl ContactBook {
    /// Load the directory at `path`. A broken file yields an empty book.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dir = ContactDirectory::load(&path);
        info!(path = %path.display(), count = dir.len(), "contact book opened");
        Self {
            path: Some(path),
            current: RwLock::new(Arc::new(dir)),
        }
    }

    /// Book with a fixed directory and no backing file.
    pub fn from_directory(dir: ContactDirectory) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(dir)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current directory snapshot.
    pub fn directory(&self) -> Arc<ContactDirectory> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the backing file and swap the directory wholesale.
    ///
    /// On failure the previous directory stays in place. Returns the number
    /// of entries now loaded.
    pub fn reload(&self) -> Result<usize, DirectoryLoadError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.directory().len());
        };

        let dir = ContactDirectory::try_load(path)?;
        let count = dir.len();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(dir);
        info!(path = %path.display(), count, "contact book reloaded");
        Ok(count)
    }
}
