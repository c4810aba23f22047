//! Preflight checks for a pebuild run.
//!
//! Validates the deployment tools and the directories each enabled step
//! needs before the image is touched. Run with `pebuild preflight`.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::BuildConfiguration;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &BuildConfiguration) -> PreflightReport {
    let mut checks = Vec::new();

    tracing::info!("checking host tools");
    checks.extend(host_tools::check_host_tools(config));

    tracing::info!("checking build environment");
    checks.extend(environment::check_build_environment(config));

    PreflightReport { checks }
}

/// Run preflight and bail if any check fails. With `strict`, warnings fail too.
pub fn run_preflight_or_fail(config: &BuildConfiguration, strict: bool) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }
    if strict && report.warn_count() > 0 {
        bail!(
            "Preflight failed in strict mode: {} warning(s).",
            report.warn_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
