//! pebuild library exports.
//!
//! The binary is a thin clap front end over these modules; integration
//! tests drive them directly with a scripted executor.

pub mod cancel;
pub mod common;
pub mod config;
pub mod drivers;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod progress;
pub mod timing;

pub use error::{Error, Result};
