//! Build environment checks (directories the steps read from and write to).

use std::fs;
use std::path::Path;

use crate::config::{BuildConfiguration, PublishTarget};
use crate::pipeline::StepName;

use super::types::CheckResult;

pub fn check_build_environment(config: &BuildConfiguration) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let layout = config.layout();

    // Provisioning and every package step read from here.
    if config.tool_root.is_dir() {
        results.push(CheckResult::pass_with(
            "tool root",
            &config.tool_root.to_string_lossy(),
        ));
    } else {
        results.push(CheckResult::fail(
            "tool root",
            &format!("{} not found - WinPE add-on not installed?", config.tool_root.display()),
        ));
    }

    if layout.is_provisioned() {
        results.push(CheckResult::pass_with(
            "working image",
            &layout.image_file.to_string_lossy(),
        ));
    } else if layout.root.exists() {
        results.push(CheckResult::fail(
            "working image",
            &format!(
                "{} exists but holds no {} - remove it or point image_dir elsewhere",
                layout.root.display(),
                layout.image_file.display()
            ),
        ));
    } else {
        results.push(CheckResult::warn(
            "working image",
            "Not provisioned yet - the build will create it",
        ));
    }

    if layout.sentinel.exists() {
        results.push(CheckResult::warn(
            "mount directory",
            "Image already mounted - the build will reuse the mount",
        ));
    }

    results.push(check_input_dir(
        config,
        StepName::Drivers,
        "driver directory",
        &config.driver_dir,
    ));
    if let Some(archives) = &config.driver_archives {
        results.push(check_input_dir(
            config,
            StepName::Drivers,
            "driver archives",
            archives,
        ));
    }
    results.push(check_input_dir(
        config,
        StepName::ExternalApps,
        "apps directory",
        &config.apps_dir,
    ));

    if config.is_enabled(StepName::Publish) && config.publish_target == PublishTarget::Iso {
        results.push(check_output_writable(&config.output));
    }

    results
}

fn check_input_dir(
    config: &BuildConfiguration,
    step: StepName,
    name: &str,
    dir: &Path,
) -> CheckResult {
    if !config.is_enabled(step) {
        return CheckResult::skip(name, &format!("step '{}' disabled", step));
    }
    if dir.is_dir() {
        CheckResult::pass_with(name, &dir.to_string_lossy())
    } else {
        CheckResult::warn(
            name,
            &format!("{} not found - '{}' will have nothing to do", dir.display(), step),
        )
    }
}

/// The ISO's parent directory must exist or be creatable.
fn check_output_writable(output: &Path) -> CheckResult {
    const NAME: &str = "output writable";
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    if let Err(e) = fs::create_dir_all(parent) {
        return CheckResult::fail(NAME, &format!("Cannot create {}: {}", parent.display(), e));
    }
    let probe = parent.join(".pebuild-preflight");
    match fs::write(&probe, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(NAME, &parent.to_string_lossy())
        }
        Err(e) => CheckResult::fail(NAME, &format!("Cannot write to {}: {}", parent.display(), e)),
    }
}
