//! pebuild - WinPE recovery image builder.
//!
//! Customizes a WinPE working image in one ordered run:
//! - provision and mount the boot image
//! - add optional components, language packs, fonts and drivers
//! - copy external tools into the image
//! - commit and publish as an ISO or a bootable USB disk

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pebuild::config::{ConfigDocument, CONFIG_FILE};
use pebuild::image::{FileSystem, PartitionScheme};

use commands::build::BuildOptions;
use commands::config::ConfigAction;
use commands::drivers::DriversAction;
use commands::image::ImageAction;
use commands::usb::{PlanOverrides, UsbAction};

#[derive(Parser)]
#[command(name = "pebuild")]
#[command(about = "WinPE recovery image builder")]
#[command(
    after_help = "QUICK START:\n  pebuild config init   Write a default pebuild.toml\n  pebuild preflight     Check tools and directories\n  pebuild build         Customize and publish the image\n  pebuild drivers scan  Classify a driver tree"
)]
struct Cli {
    /// Config file (default: ./pebuild.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Working directory for relative paths and .env
    #[arg(long, short = 'C', global = true)]
    dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the customization pipeline
    Build {
        /// Stop at the next safe point once this file exists
        #[arg(long)]
        stop_file: Option<PathBuf>,

        /// Warn when a tool has been silent this many seconds
        #[arg(long)]
        stall_secs: Option<u64>,

        /// Skip a step for this run (repeatable)
        #[arg(long = "skip", value_name = "STEP")]
        skip: Vec<String>,

        /// Run only provisioning, mounting and publishing
        #[arg(long)]
        bare: bool,

        #[arg(long)]
        no_preflight: bool,
    },

    /// Manage the working image mount
    Image {
        #[command(subcommand)]
        what: ImageTarget,
    },

    /// Inspect or unpack drivers
    Drivers {
        #[command(subcommand)]
        what: DriversTarget,
    },

    /// Write the image to a USB disk
    Usb {
        #[command(subcommand)]
        what: UsbTarget,

        /// Disk number as listed by diskpart
        #[arg(long, global = true)]
        disk: Option<u32>,
        #[arg(long, global = true)]
        scheme: Option<PartitionScheme>,
        #[arg(long, global = true)]
        filesystem: Option<FileSystem>,
        #[arg(long, global = true)]
        letter: Option<char>,
        #[arg(long, global = true)]
        label: Option<String>,

        /// Permit disk 0, usually the system disk
        #[arg(long, global = true)]
        allow_system_disk: bool,
    },

    /// Show or edit configuration
    Config {
        #[command(subcommand)]
        what: ConfigTarget,
    },

    /// Run preflight checks (verify tools and directories before build)
    Preflight {
        /// Fail on any failed check or warning (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ImageTarget {
    /// Show provisioning and mount state
    Status,
    /// Mount the boot image
    Mount,
    /// Unmount, committing changes unless --discard is given
    Unmount {
        #[arg(long)]
        discard: bool,
    },
    /// Release stale mounts from an interrupted run
    Cleanup,
}

#[derive(Subcommand)]
enum DriversTarget {
    /// Classify every driver descriptor under a directory
    Scan {
        /// Directory to scan (default: paths.driver_dir)
        dir: Option<PathBuf>,
        /// Also write the report to a file
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Extract driver archives and file packages by category
    Extract {
        /// Archive directory (default: paths.driver_archives)
        source: Option<PathBuf>,
        /// Output directory (default: paths.driver_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Extract every archive, not just the storage and network packs
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum UsbTarget {
    /// Print the partitioning script
    Script {
        /// Save the script into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Partition the disk and copy the media (destroys disk contents)
    Write {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigTarget {
    /// Show the effective configuration
    Show,
    /// Write a default pebuild.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Enable a step
    Enable { step: String },
    /// Disable a step
    Disable { step: String },
    /// Enable or disable all optional steps
    All {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let base_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE));
    let load = || ConfigDocument::load_layered(&base_dir, Some(&config_path));

    match cli.command {
        Commands::Build {
            stop_file,
            stall_secs,
            skip,
            bare,
            no_preflight,
        } => {
            let mut doc = load()?;
            if bare {
                doc.set_optional_steps(false);
            }
            for name in &skip {
                let Some(step) = pebuild::pipeline::StepName::parse(name) else {
                    anyhow::bail!("Unknown step '{}'", name);
                };
                doc.set_step(step, false)?;
            }
            let config = doc.snapshot(&base_dir)?;
            let code = commands::cmd_build(
                config,
                BuildOptions {
                    stop_file,
                    stall_secs,
                    skip_preflight: no_preflight,
                },
            )?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Image { what } => {
            let action = match what {
                ImageTarget::Status => ImageAction::Status,
                ImageTarget::Mount => ImageAction::Mount,
                ImageTarget::Unmount { discard } => ImageAction::Unmount { discard },
                ImageTarget::Cleanup => ImageAction::Cleanup,
            };
            commands::cmd_image(&load()?.snapshot(&base_dir)?, action)?;
        }

        Commands::Drivers { what } => {
            let action = match what {
                DriversTarget::Scan { dir, report, json } => {
                    DriversAction::Scan { dir, report, json }
                }
                DriversTarget::Extract { source, output, all } => {
                    DriversAction::Extract { source, output, all }
                }
            };
            commands::cmd_drivers(&load()?.snapshot(&base_dir)?, action)?;
        }

        Commands::Usb {
            what,
            disk,
            scheme,
            filesystem,
            letter,
            label,
            allow_system_disk,
        } => {
            let overrides = PlanOverrides {
                disk,
                scheme,
                filesystem,
                letter,
                label,
                allow_system_disk,
            };
            let action = match what {
                UsbTarget::Script { out } => UsbAction::Script { out },
                UsbTarget::Write { yes } => UsbAction::Write { yes },
            };
            commands::cmd_usb(&load()?.snapshot(&base_dir)?, overrides, action)?;
        }

        Commands::Config { what } => {
            let action = match what {
                ConfigTarget::Show => ConfigAction::Show,
                ConfigTarget::Init { force } => ConfigAction::Init { force },
                ConfigTarget::Enable { step } => ConfigAction::SetStep { step, enabled: true },
                ConfigTarget::Disable { step } => ConfigAction::SetStep { step, enabled: false },
                ConfigTarget::All { state } => ConfigAction::SetAll {
                    enabled: state == "on",
                },
            };
            // A broken file must not block `config init --force`.
            let layered = match action {
                ConfigAction::Init { .. } => ConfigDocument::default(),
                _ => load()?,
            };
            commands::cmd_config(&base_dir, &config_path, layered, action)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&load()?.snapshot(&base_dir)?, strict)?;
        }
    }

    Ok(())
}
