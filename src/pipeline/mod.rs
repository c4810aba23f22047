//! The customization pipeline: ordered steps, the controller that walks
//! them and the worker that runs it off the caller's thread.

pub mod actions;
pub mod controller;
pub mod steps;
pub mod worker;

pub use controller::{
    Controller, RunState, RunSummary, StepContext, StepOutcome, StepRecord, StepStatus,
};
pub use steps::{StepDescriptor, StepName, STEPS};
pub use worker::{spawn, RunGuard, RunHandle};
