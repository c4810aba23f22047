//! Background execution of one pipeline run.
//!
//! The controller runs on its own named thread. The caller keeps a
//! [`RunHandle`] to poll progress, request a stop and collect the summary.
//! At most one run per working image: the run holds an exclusive lock file
//! beside the image directory for its whole lifetime.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fs2::FileExt;

use super::controller::{Controller, RunSummary};
use crate::cancel::CancelToken;
use crate::config::BuildConfiguration;
use crate::error::{Error, IoContext, Result};
use crate::process::Executor;
use crate::progress::{relay, Batch, ProgressEvent, RelayReceiver};

/// Exclusive claim on a working image. Released on drop.
#[derive(Debug)]
pub struct RunGuard {
    file: File,
    path: PathBuf,
}

impl RunGuard {
    pub fn lock_path(image_dir: &Path) -> PathBuf {
        let name = image_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let parent = image_dir.parent().unwrap_or(image_dir);
        parent.join(format!(".{}.pebuild.lock", name))
    }

    pub fn acquire(image_dir: &Path) -> Result<Self> {
        let path = Self::lock_path(image_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        // The file is never unlinked; removing a held lock file would let a
        // second process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .at(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(Error::RunInProgress {
                image_dir: image_dir.to_path_buf(),
            });
        }
        tracing::debug!("acquired {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("released {}", self.path.display());
    }
}

pub struct RunHandle {
    cancel: CancelToken,
    receiver: RelayReceiver,
    thread: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Ask the run to stop at its next observation point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn poll(&self, wait: Duration) -> Batch {
        self.receiver.poll(wait)
    }

    /// Wait for the run and return its summary plus any events not yet polled.
    pub fn join(self) -> Result<(RunSummary, Vec<ProgressEvent>)> {
        let summary = self.thread.join().map_err(|_| Error::WorkerPanicked)?;
        Ok((summary, self.receiver.drain()))
    }
}

/// Start a run in the background.
pub fn spawn(config: BuildConfiguration, exec: Arc<dyn Executor>) -> Result<RunHandle> {
    let guard = RunGuard::acquire(&config.image_dir)?;
    let (sink, receiver) = relay();
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let thread = thread::Builder::new()
        .name("pebuild-pipeline".to_string())
        .spawn(move || {
            let _guard = guard;
            let mut controller = Controller::new(&config, exec.as_ref(), &sink, &token);
            controller.run()
        })
        .map_err(|e| Error::io("pipeline worker thread", e))?;

    Ok(RunHandle {
        cancel,
        receiver,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_sits_beside_image() {
        assert_eq!(
            RunGuard::lock_path(Path::new("/work/WinPE_amd64")),
            Path::new("/work/.WinPE_amd64.pebuild.lock")
        );
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pe");

        let first = RunGuard::acquire(&image).unwrap();
        let err = RunGuard::acquire(&image).unwrap_err();
        assert!(matches!(err, Error::RunInProgress { .. }));

        drop(first);
        assert!(RunGuard::acquire(&image).is_ok());
    }
}
