//! Host tool availability checks.

use std::path::Path;

use crate::config::{BuildConfiguration, PublishTarget};
use crate::drivers::ArchiveTool;
use crate::pipeline::StepName;
use crate::process;

use super::types::CheckResult;

/// Check the deployment tools and the archive extractor.
pub fn check_host_tools(config: &BuildConfiguration) -> Vec<CheckResult> {
    let tools = &config.tools;
    let mut results = Vec::new();

    let purposes = [
        "Required to mount and service the image",
        "Required to provision the working image",
        "Required to publish ISO or USB media",
    ];
    for (tool, purpose) in tools.required_programs().into_iter().zip(purposes) {
        results.push(check_tool_exists(tool, purpose, true));
    }

    let publishes_usb =
        config.is_enabled(StepName::Publish) && config.publish_target == PublishTarget::Usb;
    if publishes_usb {
        results.push(check_tool_exists(
            &tools.diskpart,
            "Required to partition the USB disk",
            true,
        ));
    } else {
        results.push(CheckResult::skip(&tools.diskpart, "Not publishing to USB"));
    }

    if config.is_enabled(StepName::Drivers) && config.driver_archives.is_some() {
        results.push(check_archive_tool(config.archive_tool.as_deref()));
    }

    results
}

fn check_archive_tool(configured: Option<&Path>) -> CheckResult {
    const NAME: &str = "archive tool";
    match configured {
        Some(path) => match ArchiveTool::configured(path) {
            Some(tool) => CheckResult::pass_with(NAME, &tool.to_string()),
            None => CheckResult::warn(
                NAME,
                &format!("{} not found - archives will not be extracted", path.display()),
            ),
        },
        None => match ArchiveTool::resolve() {
            Some(tool) => CheckResult::pass_with(NAME, &tool.to_string()),
            None => CheckResult::warn(
                NAME,
                "Neither 7-Zip nor WinRAR found - archives will not be extracted",
            ),
        },
    }
}

fn check_tool_exists(tool: &str, purpose: &str, required: bool) -> CheckResult {
    match process::locate(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.to_string_lossy()),
        None => {
            let msg = format!(
                "Not found. Install the Windows ADK with the WinPE add-on. {}",
                purpose
            );
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("dism.exe");
        assert!(process::locate(&tool.to_string_lossy()).is_none());

        std::fs::write(&tool, "").unwrap();
        assert_eq!(process::locate(&tool.to_string_lossy()), Some(tool));
    }

    #[test]
    fn test_missing_required_tool_fails() {
        let check = check_tool_exists("pebuild-no-such-tool", "purpose", true);
        assert_eq!(check.status, super::super::types::CheckStatus::Fail);
        let check = check_tool_exists("pebuild-no-such-tool", "purpose", false);
        assert_eq!(check.status, super::super::types::CheckStatus::Warn);
    }
}
