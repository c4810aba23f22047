//! Utilities for managing temporary work directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};

/// Prepare a work directory, removing it if it exists and creating it fresh.
///
/// This consolidates the common pattern of:
/// ```ignore
/// let work_dir = base_dir.join(name);
/// if work_dir.exists() {
///     fs::remove_dir_all(&work_dir)?;
/// }
/// fs::create_dir_all(&work_dir)?;
/// ```
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    // Clean up if it exists from a previous run
    if work_dir.exists() {
        fs::remove_dir_all(&work_dir).at(&work_dir)?;
    }

    fs::create_dir_all(&work_dir).at(&work_dir)?;

    Ok(work_dir)
}

/// Clean up a work directory after use. Idempotent.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}

/// A fresh work directory that is removed when dropped, on every exit path.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(parent_dir: &Path, name: &str) -> Result<Self> {
        let path = prepare_work_dir(parent_dir, name)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        cleanup_work_dir(&self.path);
    }
}
