//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Run the customization pipeline
//! - `image` - Mount, unmount and clean up the working image
//! - `drivers` - Scan a driver tree or extract driver archives
//! - `usb` - Prepare or write a bootable USB disk
//! - `config` - Show, create or edit pebuild.toml
//! - `preflight` - Run preflight checks

pub mod build;
pub mod config;
pub mod drivers;
pub mod image;
mod preflight;
pub mod usb;

pub use build::cmd_build;
pub use config::cmd_config;
pub use drivers::cmd_drivers;
pub use image::cmd_image;
pub use preflight::cmd_preflight;
pub use usb::cmd_usb;
