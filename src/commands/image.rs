//! Image command - manual mount lifecycle for the working image.

use anyhow::{bail, Result};

use pebuild::cancel::CancelToken;
use pebuild::config::BuildConfiguration;
use pebuild::image::{MountAction, MountManager, MountState, UnmountAction};
use pebuild::pipeline::RunGuard;
use pebuild::process::{OutputMode, StreamTarget, SystemExecutor};
use pebuild::progress::ConsoleSink;

pub enum ImageAction {
    /// Print provisioning and mount state
    Status,
    Mount,
    Unmount { discard: bool },
    /// Release stale mounts left by an interrupted run
    Cleanup,
}

/// Execute the image command.
pub fn cmd_image(config: &BuildConfiguration, action: ImageAction) -> Result<()> {
    let layout = config.layout();
    let mounts = MountManager::new(layout.clone(), config.tools.clone(), config.image_index);

    if let ImageAction::Status = action {
        println!("Working image: {}", layout.root.display());
        println!(
            "  boot image:  {}",
            if layout.is_provisioned() { "present" } else { "NOT PROVISIONED" }
        );
        let state = match mounts.state() {
            MountState::Mounted => "mounted",
            MountState::Unmounted => "not mounted",
        };
        println!("  mount:       {} ({})", state, layout.mount_dir.display());
        return Ok(());
    }

    // A running build owns the mount.
    let _guard = RunGuard::acquire(&config.image_dir)?;
    let sink = ConsoleSink::new();
    let cancel = CancelToken::new();
    let mode = OutputMode::Streaming(StreamTarget::new(&sink, None, &cancel));
    let exec = SystemExecutor;

    let result = match action {
        ImageAction::Status => Ok(()),
        ImageAction::Mount => {
            if !layout.is_provisioned() {
                sink.finish();
                bail!(
                    "{} not found. Run 'pebuild build' to provision the image first.",
                    layout.image_file.display()
                );
            }
            mounts.mount(&exec, mode).map(|action| match action {
                MountAction::AlreadyMounted => {
                    println!("Already mounted at {}", layout.mount_dir.display())
                }
                MountAction::Mounted => println!("[OK] Mounted at {}", layout.mount_dir.display()),
            })
        }
        ImageAction::Unmount { discard } => {
            mounts.unmount(&exec, !discard, mode).map(|action| match action {
                UnmountAction::AlreadyUnmounted => println!("Nothing mounted"),
                UnmountAction::Committed => println!("[OK] Changes committed and image unmounted"),
                UnmountAction::Discarded => println!("[OK] Changes discarded and image unmounted"),
            })
        }
        ImageAction::Cleanup => mounts
            .cleanup_stale(&exec, mode)
            .map(|_| println!("[OK] Stale mounts cleaned up")),
    };
    sink.finish();
    Ok(result?)
}
