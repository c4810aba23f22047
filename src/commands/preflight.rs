//! Preflight command - runs preflight checks.

use anyhow::Result;

use pebuild::config::BuildConfiguration;
use pebuild::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &BuildConfiguration, strict: bool) -> Result<()> {
    println!("Running preflight checks...\n");
    if strict {
        preflight::run_preflight_or_fail(config, true)?;
    } else {
        let report = preflight::run_preflight(config);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to turn failures and warnings into an error.");
        }
    }
    Ok(())
}
