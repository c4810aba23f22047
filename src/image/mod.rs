//! Working image layout and mount lifecycle.
//!
//! Mount state is never stored. It is derived each time from the sentinel
//! directory (`<mount>/Windows`) so a crashed or interrupted run is picked
//! up correctly by the next one.

pub mod diskpart;
pub mod tools;

use std::fs;
use std::path::{Path, PathBuf};

pub use diskpart::{FileSystem, PartitionPlan, PartitionScheme};
pub use tools::ToolKit;

use crate::error::{Error, IoContext, Result};
use crate::process::{Executor, OutputMode};

/// Paths inside a provisioned working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub root: PathBuf,
    /// Compressed boot image (`media/sources/boot.wim`).
    pub image_file: PathBuf,
    pub mount_dir: PathBuf,
    /// Appears once the image is mounted.
    pub sentinel: PathBuf,
}

impl ImageLayout {
    pub fn new(root: &Path) -> Self {
        let mount_dir = root.join("mount");
        Self {
            root: root.to_path_buf(),
            image_file: root.join("media").join("sources").join("boot.wim"),
            sentinel: mount_dir.join("Windows"),
            mount_dir,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.image_file.is_file()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAction {
    AlreadyMounted,
    Mounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountAction {
    AlreadyUnmounted,
    Committed,
    Discarded,
}

/// Idempotent mount/commit/discard around the servicing tool.
#[derive(Debug, Clone)]
pub struct MountManager {
    layout: ImageLayout,
    tools: ToolKit,
    index: u32,
}

impl MountManager {
    pub fn new(layout: ImageLayout, tools: ToolKit, index: u32) -> Self {
        Self {
            layout,
            tools,
            index,
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn is_mounted(&self) -> bool {
        self.layout.sentinel.is_dir()
    }

    pub fn state(&self) -> MountState {
        if self.is_mounted() {
            MountState::Mounted
        } else {
            MountState::Unmounted
        }
    }

    pub fn mount(&self, exec: &dyn Executor, mode: OutputMode<'_>) -> Result<MountAction> {
        if self.is_mounted() {
            tracing::debug!("{} already mounted", self.layout.mount_dir.display());
            return Ok(MountAction::AlreadyMounted);
        }
        if !self.layout.image_file.is_file() {
            return Err(Error::missing("base image", &self.layout.image_file));
        }

        fs::create_dir_all(&self.layout.mount_dir).at(&self.layout.mount_dir)?;
        self.tools
            .mount(&self.layout.image_file, self.index, &self.layout.mount_dir)
            .run_with(exec, mode)?;

        if !self.is_mounted() {
            return Err(Error::MountVerificationFailed {
                sentinel: self.layout.sentinel.clone(),
            });
        }
        Ok(MountAction::Mounted)
    }

    /// Unmount, persisting changes only when `commit` is true.
    pub fn unmount(
        &self,
        exec: &dyn Executor,
        commit: bool,
        mode: OutputMode<'_>,
    ) -> Result<UnmountAction> {
        if !self.is_mounted() {
            tracing::debug!("{} not mounted", self.layout.mount_dir.display());
            return Ok(UnmountAction::AlreadyUnmounted);
        }

        self.tools
            .unmount(&self.layout.mount_dir, commit)
            .run_with(exec, mode)?;

        Ok(if commit {
            UnmountAction::Committed
        } else {
            UnmountAction::Discarded
        })
    }

    pub fn cleanup_stale(&self, exec: &dyn Executor, mode: OutputMode<'_>) -> Result<()> {
        self.tools.cleanup_mounts().run_with(exec, mode)?;
        Ok(())
    }
}
