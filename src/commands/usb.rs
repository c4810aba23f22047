//! USB command - partition a disk and copy the working image's media onto it.

use anyhow::{bail, Result};
use std::path::PathBuf;

use pebuild::cancel::CancelToken;
use pebuild::config::BuildConfiguration;
use pebuild::image::{FileSystem, MountManager, PartitionPlan, PartitionScheme};
use pebuild::pipeline::RunGuard;
use pebuild::process::{OutputMode, StreamTarget, SystemExecutor};
use pebuild::progress::ConsoleSink;

/// Command-line overrides for the configured partition plan.
#[derive(Default)]
pub struct PlanOverrides {
    pub disk: Option<u32>,
    pub scheme: Option<PartitionScheme>,
    pub filesystem: Option<FileSystem>,
    pub letter: Option<char>,
    pub label: Option<String>,
    pub allow_system_disk: bool,
}

impl PlanOverrides {
    fn apply(self, mut plan: PartitionPlan) -> PartitionPlan {
        if let Some(disk) = self.disk {
            plan.disk = disk;
        }
        if let Some(scheme) = self.scheme {
            plan.scheme = scheme;
        }
        if let Some(filesystem) = self.filesystem {
            plan.filesystem = filesystem;
        }
        if let Some(letter) = self.letter {
            plan.letter = letter.to_ascii_uppercase();
        }
        if let Some(label) = self.label {
            plan.label = label;
        }
        plan.allow_system_disk |= self.allow_system_disk;
        plan
    }
}

pub enum UsbAction {
    /// Print the partitioning script, optionally saving it
    Script { out: Option<PathBuf> },
    /// Wipe the disk and write the media. Requires explicit confirmation.
    Write { yes: bool },
}

/// Execute the usb command.
pub fn cmd_usb(
    config: &BuildConfiguration,
    overrides: PlanOverrides,
    action: UsbAction,
) -> Result<()> {
    let plan = overrides.apply(config.usb.clone());
    plan.validate()?;

    match action {
        UsbAction::Script { out } => {
            print!("{}", plan.script().replace("\r\n", "\n"));
            if let Some(dir) = out {
                let path = plan.write_script(&dir)?;
                println!("\nScript written to {}", path.display());
            }
            Ok(())
        }
        UsbAction::Write { yes } => write(config, &plan, yes),
    }
}

fn write(config: &BuildConfiguration, plan: &PartitionPlan, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "This erases every partition on disk {}. Re-run with --yes to continue.",
            plan.disk
        );
    }

    let layout = config.layout();
    if !layout.is_provisioned() {
        bail!("{} not found. Run 'pebuild build' first.", layout.image_file.display());
    }
    let _guard = RunGuard::acquire(&config.image_dir)?;
    let mounts = MountManager::new(layout.clone(), config.tools.clone(), config.image_index);
    if mounts.is_mounted() {
        bail!("Image is still mounted. Run 'pebuild image unmount' first.");
    }

    let sink = ConsoleSink::new();
    let cancel = CancelToken::new();
    let mode = OutputMode::Streaming(StreamTarget::new(&sink, None, &cancel));
    let exec = SystemExecutor;

    let script = plan.write_script(&layout.root)?;
    println!("Partitioning disk {} ({} / {})", plan.disk, plan.scheme, plan.filesystem);
    let result = config
        .tools
        .run_diskpart(&script)
        .run_with(&exec, mode)
        .and_then(|_| config.tools.make_ufd(&layout.root, &plan.drive()).run_with(&exec, mode));
    sink.finish();
    result?;

    println!("[OK] Bootable USB written to {}", plan.drive());
    Ok(())
}
