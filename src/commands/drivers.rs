//! Drivers command - inventory a driver tree or unpack driver archives.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use pebuild::cancel::CancelToken;
use pebuild::common::write_file_with_dirs;
use pebuild::config::BuildConfiguration;
use pebuild::drivers::{
    ArchiveFilter, ArchiveTool, Classifier, DriverCategory, Extractor, ScanReport,
};
use pebuild::process::{StreamTarget, SystemExecutor};
use pebuild::progress::ConsoleSink;
use pebuild::timing::Timer;

pub enum DriversAction {
    Scan {
        dir: Option<PathBuf>,
        /// Also write the report to this file
        report: Option<PathBuf>,
        json: bool,
    },
    Extract {
        source: Option<PathBuf>,
        output: Option<PathBuf>,
        /// Ignore the archive name allow-list
        all: bool,
    },
}

/// Execute the drivers command.
pub fn cmd_drivers(config: &BuildConfiguration, action: DriversAction) -> Result<()> {
    match action {
        DriversAction::Scan { dir, report, json } => scan(config, dir, report, json),
        DriversAction::Extract { source, output, all } => extract(config, source, output, all),
    }
}

fn scan(
    config: &BuildConfiguration,
    dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.driver_dir.clone());
    let report = ScanReport::scan(&dir, Classifier::builtin())?;

    let text = if json {
        report.to_json().context("Failed to serialize scan report")?
    } else {
        report.render_text()
    };
    print!("{}", text);
    if !text.ends_with('\n') {
        println!();
    }

    if let Some(path) = report_path {
        write_file_with_dirs(&path, &text)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn extract(
    config: &BuildConfiguration,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
    all: bool,
) -> Result<()> {
    let Some(source) = source.or_else(|| config.driver_archives.clone()) else {
        bail!("No archive directory. Pass one or set paths.driver_archives in pebuild.toml.");
    };
    let output = output.unwrap_or_else(|| config.driver_dir.clone());

    let tool = match &config.archive_tool {
        Some(program) => match ArchiveTool::configured(program) {
            Some(tool) => tool,
            None => bail!("Configured archive tool {} not found.", program.display()),
        },
        None => match ArchiveTool::resolve() {
            Some(tool) => tool,
            None => {
                bail!("Neither 7-Zip nor WinRAR found. Install one or set drivers.archive_tool.")
            }
        },
    };
    let filter = if all {
        ArchiveFilter::accept_all()
    } else {
        config.archive_filter.clone()
    };

    println!("Extracting {} -> {} with {}", source.display(), output.display(), tool);
    let timer = Timer::start("Driver extraction");
    let sink = ConsoleSink::new();
    let cancel = CancelToken::new();
    let extractor = Extractor::new(tool, Classifier::builtin());
    let summary = extractor.extract_dir(
        &SystemExecutor,
        &source,
        &filter,
        &config.scratch_dir,
        &output,
        StreamTarget::new(&sink, None, &cancel),
        &cancel,
    )?;
    sink.finish();
    timer.finish();

    println!("\n=== Extraction Summary ===");
    println!("  Archives:      {} ({} failed)", summary.archives, summary.failed);
    for category in DriverCategory::all() {
        println!("  {:<14} {}", format!("{}:", category), summary.counts.get(*category));
    }
    if summary.counts.already_present > 0 {
        println!("  Already present: {}", summary.counts.already_present);
    }
    if summary.counts.copy_failures > 0 {
        println!("[WARN] {} package copies failed", summary.counts.copy_failures);
    }
    Ok(())
}
