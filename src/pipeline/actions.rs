//! Step actions. Each one runs against a [`StepContext`] and reports how
//! many items it handled.
//!
//! Missing inputs (a package file, an app, the driver directory) are item
//! skips. A tool exiting non-zero for one item marks that item failed and
//! the step carries on. Only provision, mount and publish return errors
//! that end the run.

use std::fs;
use std::path::{Path, PathBuf};

use super::controller::{StepContext, StepOutcome};
use crate::common::{copy_entry, file_size_mb};
use crate::config::{PackageSpec, PublishTarget};
use crate::drivers::{ArchiveTool, Classifier, Extractor};
use crate::error::{Error, IoContext, Result};
use crate::image::MountAction;
use crate::process::{Cmd, OutputMode};

pub fn provision(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let config = ctx.config;
    if !config.tool_root.is_dir() {
        return Err(Error::missing("deployment kit packages", &config.tool_root));
    }

    let layout = ctx.mounts.layout();
    if layout.is_provisioned() {
        ctx.info(format!("Base image present: {}", layout.image_file.display()));
        return Ok(StepOutcome::nothing_to_do());
    }
    if layout.root.exists() {
        // The provisioning script refuses to write into an existing directory.
        return Err(Error::missing("base image", &layout.image_file));
    }

    ctx.info(format!("Creating working directory {}", layout.root.display()));
    config.tools.provision(&layout.root).run_with(ctx.exec, ctx.streaming())?;

    if !layout.is_provisioned() {
        return Err(Error::missing("base image after provisioning", &layout.image_file));
    }
    Ok(StepOutcome::done())
}

pub fn mount(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    match ctx.mounts.mount(ctx.exec, ctx.streaming())? {
        MountAction::AlreadyMounted => {
            ctx.info(format!(
                "Already mounted at {}",
                ctx.mounts.layout().mount_dir.display()
            ));
            Ok(StepOutcome::nothing_to_do())
        }
        MountAction::Mounted => {
            ctx.success("Image mounted and verified");
            Ok(StepOutcome::done())
        }
    }
}

pub fn feature_packages(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let root = ctx.config.tool_root.clone();
    install_packages(ctx, &ctx.config.feature_packages, &root)
}

pub fn language_packages(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let root = ctx.config.tool_root.join(&ctx.config.language);
    install_packages(ctx, &ctx.config.language_packages, &root)
}

pub fn fonts(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let root = ctx.config.tool_root.clone();
    install_packages(ctx, &ctx.config.font_packages, &root)
}

/// `name` may contain `/` (e.g. `zh-cn/lp`).
fn package_path(root: &Path, name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    let parts: Vec<&str> = name.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
    if let Some((last, dirs)) = parts.split_last() {
        path.extend(dirs);
        path.push(format!("{}.cab", last));
    }
    path
}

fn install_packages(
    ctx: &StepContext<'_>,
    packages: &[PackageSpec],
    root: &Path,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let mount_dir = &ctx.mounts.layout().mount_dir;
    let total = packages.len();

    for (i, package) in packages.iter().enumerate() {
        ctx.check_cancelled()?;

        let path = package_path(root, &package.name);
        if !path.is_file() {
            ctx.warn(format!(
                "[{}/{}] {}: file not found ({})",
                i + 1,
                total,
                package.name,
                path.display()
            ));
            outcome.skipped += 1;
            continue;
        }

        ctx.info(format!("[{}/{}] Installing {}", i + 1, total, package.name));
        let result = ctx
            .config
            .tools
            .add_package(mount_dir, &path)
            .allow_fail()
            .run_with(ctx.exec, ctx.streaming())?;
        if result.success() {
            ctx.success(format!("{} installed", package.name));
            outcome.succeeded += 1;
        } else {
            ctx.warn(format!("{} failed (exit code {})", package.name, result.code()));
            outcome.failed += 1;
        }
    }
    Ok(outcome)
}

pub fn regional_settings(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let mount_dir = &ctx.mounts.layout().mount_dir;

    for setting in &ctx.config.regional_settings {
        ctx.check_cancelled()?;
        let cmd = ctx
            .config
            .tools
            .intl_setting(mount_dir, &setting.setting)
            .allow_fail();
        tally(ctx, &setting.setting, cmd, OutputMode::Captured, &mut outcome)?;
    }
    Ok(outcome)
}

pub fn drivers(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let config = ctx.config;
    let mut outcome = StepOutcome::default();

    if let Some(archives) = config.driver_archives.as_deref().filter(|p| p.is_dir()) {
        let tool = match &config.archive_tool {
            Some(program) => ArchiveTool::configured(program),
            None => ArchiveTool::resolve(),
        };
        match tool {
            Some(tool) => {
                ctx.info(format!("Extracting driver archives with {}", tool));
                let extractor = Extractor::new(tool, Classifier::builtin());
                let batch = extractor.extract_dir(
                    ctx.exec,
                    archives,
                    &config.archive_filter,
                    &config.scratch_dir,
                    &config.driver_dir,
                    ctx.target(),
                    ctx.cancel,
                )?;
                if batch.cancelled {
                    return Err(Error::Cancelled);
                }
                outcome.succeeded += batch.archives - batch.failed;
                outcome.failed += batch.failed;
            }
            None => {
                ctx.warn("Archive tool (WinRAR or 7-Zip) not found; skipping archive extraction");
                outcome.skipped += 1;
            }
        }
    }

    let driver_dir = &config.driver_dir;
    if !driver_dir.is_dir() {
        ctx.warn(format!("Driver directory not found: {}", driver_dir.display()));
        outcome.skipped += 1;
        return Ok(outcome);
    }

    let mount_dir = &ctx.mounts.layout().mount_dir;
    let subdirs = driver_subdirs(driver_dir)?;
    if subdirs.is_empty() {
        let cmd = config.tools.add_driver(mount_dir, driver_dir).allow_fail();
        tally(ctx, &driver_dir.display().to_string(), cmd, ctx.streaming(), &mut outcome)?;
        return Ok(outcome);
    }

    let total = subdirs.len();
    for (i, dir) in subdirs.iter().enumerate() {
        ctx.check_cancelled()?;
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        ctx.info(format!("[{}/{}] Adding drivers from {}", i + 1, total, name));
        let cmd = config.tools.add_driver(mount_dir, dir).allow_fail();
        tally(ctx, &name, cmd, ctx.streaming(), &mut outcome)?;
    }
    Ok(outcome)
}

/// Non-hidden subdirectories, sorted by name.
fn driver_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if path.is_dir() && !hidden {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

fn tally(
    ctx: &StepContext<'_>,
    item: &str,
    cmd: Cmd,
    mode: OutputMode<'_>,
    outcome: &mut StepOutcome,
) -> Result<()> {
    let result = cmd.run_with(ctx.exec, mode)?;
    if result.success() {
        ctx.success(format!("{}: done", item));
        outcome.succeeded += 1;
    } else {
        ctx.warn(format!("{}: failed (exit code {})", item, result.code()));
        outcome.failed += 1;
    }
    Ok(())
}

pub fn external_apps(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let config = ctx.config;
    let mut outcome = StepOutcome::default();

    if !config.apps_dir.is_dir() {
        ctx.warn(format!("Apps directory not found: {}", config.apps_dir.display()));
        outcome.skipped += config.external_apps.len().max(1);
        return Ok(outcome);
    }

    let mount_dir = &ctx.mounts.layout().mount_dir;
    for app in &config.external_apps {
        ctx.check_cancelled()?;
        let source = config.apps_dir.join(&app.source);
        if !source.exists() {
            ctx.warn(format!("{}: not found, skipped", app.source));
            outcome.skipped += 1;
            continue;
        }
        let file_name = source.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let dest = mount_dir.join(&app.destination).join(file_name);

        match copy_entry(&source, &dest) {
            Ok(files) => {
                ctx.success(format!("{} copied ({} files)", app.source, files));
                outcome.succeeded += 1;
            }
            Err(e) => {
                ctx.warn(format!("{}: copy failed: {}", app.source, e));
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

pub fn custom_dirs(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let mount_dir = &ctx.mounts.layout().mount_dir;

    for name in &ctx.config.custom_dirs {
        let path = mount_dir.join(name);
        if path.exists() {
            ctx.info(format!("{}: already exists", name));
            outcome.skipped += 1;
            continue;
        }
        match fs::create_dir_all(&path) {
            Ok(()) => {
                ctx.success(format!("{}: created", name));
                outcome.succeeded += 1;
            }
            Err(e) => {
                ctx.warn(format!("{}: {}", name, e));
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

pub fn publish(ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
    let config = ctx.config;
    let layout = ctx.mounts.layout();

    ctx.info("Committing changes and unmounting");
    ctx.mounts.unmount(ctx.exec, true, ctx.streaming())?;

    match config.publish_target {
        PublishTarget::Iso => {
            if let Some(parent) = config.output.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            config
                .tools
                .make_iso(&layout.root, &config.output)
                .run_with(ctx.exec, ctx.streaming())?;
            match file_size_mb(&config.output) {
                Ok(size) => ctx.success(format!(
                    "ISO written: {} ({:.0} MB)",
                    config.output.display(),
                    size
                )),
                Err(_) => ctx.warn(format!(
                    "Media tool succeeded but {} was not found",
                    config.output.display()
                )),
            }
        }
        PublishTarget::Usb => {
            let plan = &config.usb;
            let script = plan.write_script(&layout.root)?;
            ctx.info(format!(
                "Partitioning disk {} ({} / {})",
                plan.disk, plan.scheme, plan.filesystem
            ));
            config
                .tools
                .run_diskpart(&script)
                .run_with(ctx.exec, ctx.streaming())?;
            config
                .tools
                .make_ufd(&layout.root, &plan.drive())
                .run_with(ctx.exec, ctx.streaming())?;
            ctx.success(format!("Bootable USB written to {}", plan.drive()));
        }
    }
    Ok(StepOutcome::done())
}
