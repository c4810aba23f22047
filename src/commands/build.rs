//! Build command - runs the customization pipeline on a worker thread and
//! renders its progress on the console.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pebuild::config::BuildConfiguration;
use pebuild::pipeline::{self, StepName};
use pebuild::preflight;
use pebuild::process::SystemExecutor;
use pebuild::progress::{ConsoleRenderer, ProgressEvent, StallMonitor, POLL_INTERVAL};

pub struct BuildOptions {
    /// Request a stop once this file appears.
    pub stop_file: Option<PathBuf>,
    /// Override the configured stall warning threshold.
    pub stall_secs: Option<u64>,
    pub skip_preflight: bool,
}

/// Execute the build command. Returns the process exit code.
pub fn cmd_build(config: BuildConfiguration, options: BuildOptions) -> Result<i32> {
    println!("=== WinPE Customization Build ===\n");

    if options.skip_preflight {
        println!("[WARN] Preflight skipped");
    } else {
        preflight::run_preflight_or_fail(&config, false)?;
    }

    let enabled: Vec<&str> = StepName::all()
        .iter()
        .filter(|s| config.is_enabled(**s))
        .map(|s| s.as_str())
        .collect();
    println!("Steps: {}\n", enabled.join(", "));

    let stall = options
        .stall_secs
        .map(Duration::from_secs)
        .unwrap_or(config.stall_warning);

    let handle = pipeline::spawn(config, Arc::new(SystemExecutor))?;
    let mut renderer = ConsoleRenderer::new(io::stdout());
    let mut monitor = StallMonitor::new(stall, Instant::now());
    let mut stop_requested = false;

    loop {
        let batch = handle.poll(POLL_INTERVAL);
        for event in &batch.events {
            renderer.render(event)?;
        }
        if let Some(warning) = monitor.observe(!batch.events.is_empty(), Instant::now()) {
            renderer.render(&warning)?;
        }

        if !stop_requested {
            if let Some(stop_file) = options.stop_file.as_ref().filter(|p| p.exists()) {
                let _ = fs::remove_file(stop_file);
                handle.cancel();
                stop_requested = true;
                renderer.render(&ProgressEvent::warning(
                    "Stop requested; the current item will finish first",
                ))?;
            }
        }

        if batch.closed {
            break;
        }
    }

    let (summary, remaining) = handle.join()?;
    for event in &remaining {
        renderer.render(event)?;
    }
    renderer.finish()?;

    for record in &summary.steps {
        tracing::debug!(
            "{}: {:?} in {:.1}s",
            record.name,
            record.status,
            record.duration.as_secs_f64()
        );
    }
    Ok(summary.exit_code())
}
