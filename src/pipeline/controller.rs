//! Pipeline state machine.
//!
//! Walks [`STEPS`] in order. Cancellation is observed before every step; a
//! disabled step is reported as skipped; a failing fatal step ends the run,
//! a failing optional step is recorded and the run moves on. Exactly one
//! summary event is emitted when the run reaches a terminal state.

use std::time::Duration;

use super::steps::{StepName, STEPS};
use crate::cancel::CancelToken;
use crate::config::BuildConfiguration;
use crate::error::{Error, Result};
use crate::image::MountManager;
use crate::process::{Executor, OutputMode, StreamTarget};
use crate::progress::{ProgressEvent, ProgressSink, Severity};
use crate::timing::{format_duration, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Process exit code for this state.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Cancelled => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    /// Disabled by configuration.
    Skipped,
    Failed,
    /// Stopped between items by a cancel request.
    Cancelled,
}

/// Per-item tally returned by a step action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StepOutcome {
    pub fn done() -> Self {
        Self {
            succeeded: 1,
            ..Default::default()
        }
    }

    pub fn nothing_to_do() -> Self {
        Self {
            skipped: 1,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: StepOutcome) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: StepName,
    pub status: StepStatus,
    pub items: StepOutcome,
    pub duration: Duration,
    pub message: Option<String>,
}

impl StepRecord {
    pub fn was_attempted(&self) -> bool {
        self.status != StepStatus::Skipped
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    pub steps: Vec<StepRecord>,
    pub failed_step: Option<StepName>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            steps: Vec::new(),
            failed_step: None,
        }
    }

    pub fn step(&self, name: StepName) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.name == name)
    }

    /// Steps whose action ran, including prerequisites and publish.
    pub fn attempted(&self) -> usize {
        self.steps.iter().filter(|r| r.was_attempted()).count()
    }

    pub fn optional_attempted(&self) -> usize {
        self.steps
            .iter()
            .filter(|r| r.was_attempted() && r.name.is_optional())
            .count()
    }

    pub fn steps_skipped(&self) -> usize {
        self.count_status(StepStatus::Skipped)
    }

    pub fn steps_failed(&self) -> usize {
        self.count_status(StepStatus::Failed)
    }

    fn count_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|r| r.status == status).count()
    }

    pub fn items(&self) -> StepOutcome {
        let mut total = StepOutcome::default();
        for record in &self.steps {
            total.merge(record.items);
        }
        total
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    pub fn describe(&self) -> String {
        let items = self.items();
        let head = match self.state {
            RunState::Completed => "Build completed".to_string(),
            RunState::Cancelled => "Build cancelled".to_string(),
            _ => match self.failed_step {
                Some(step) => format!("Build failed at '{}'", step),
                None => "Build failed".to_string(),
            },
        };
        format!(
            "{}: {} steps attempted ({} optional), {} skipped, {} failed; items {} ok, {} skipped, {} failed",
            head,
            self.attempted(),
            self.optional_attempted(),
            self.steps_skipped(),
            self.steps_failed(),
            items.succeeded,
            items.skipped,
            items.failed
        )
    }
}

/// Everything a step action may touch.
pub struct StepContext<'a> {
    pub config: &'a BuildConfiguration,
    pub exec: &'a dyn Executor,
    pub sink: &'a dyn ProgressSink,
    pub cancel: &'a CancelToken,
    pub mounts: &'a MountManager,
    pub step: StepName,
}

impl<'a> StepContext<'a> {
    /// Output mode that relays tool output tagged with this step.
    pub fn streaming(&self) -> OutputMode<'a> {
        OutputMode::Streaming(self.target())
    }

    pub fn target(&self) -> StreamTarget<'a> {
        StreamTarget::new(self.sink, Some(self.step), self.cancel)
    }

    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        self.sink
            .emit(ProgressEvent::new(severity, message).in_step(Some(self.step)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(Severity::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Severity::Warning, message);
    }

    /// Bail out between items once a stop was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct Controller<'a> {
    config: &'a BuildConfiguration,
    exec: &'a dyn Executor,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancelToken,
    state: RunState,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: &'a BuildConfiguration,
        exec: &'a dyn Executor,
        sink: &'a dyn ProgressSink,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            config,
            exec,
            sink,
            cancel,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::new();
        if self.state != RunState::Idle {
            tracing::warn!("controller reused after a run; ignoring");
            summary.state = self.state;
            return summary;
        }

        self.state = RunState::Running;
        let run_timer = Timer::start("build");
        let mounts = MountManager::new(
            self.config.layout(),
            self.config.tools.clone(),
            self.config.image_index,
        );
        let total = STEPS.len();

        for descriptor in STEPS {
            let step = descriptor.name;
            if self.cancel.is_cancelled() {
                self.emit(ProgressEvent::warning(format!("Stop requested before '{}'", step)));
                self.state = RunState::Cancelled;
                break;
            }

            if !descriptor.is_enabled(self.config) {
                self.emit(
                    ProgressEvent::info(format!("Skipped: {} (disabled)", step.label()))
                        .in_step(Some(step)),
                );
                summary.steps.push(StepRecord {
                    name: step,
                    status: StepStatus::Skipped,
                    items: StepOutcome::default(),
                    duration: Duration::ZERO,
                    message: None,
                });
                continue;
            }

            self.emit(
                ProgressEvent::info(format!(
                    "==> [{}/{}] {}",
                    descriptor.ordinal + 1,
                    total,
                    step.label()
                ))
                .in_step(Some(step)),
            );

            let timer = Timer::start(step.label());
            let mut ctx = StepContext {
                config: self.config,
                exec: self.exec,
                sink: self.sink,
                cancel: self.cancel,
                mounts: &mounts,
                step,
            };
            let result = (descriptor.action)(&mut ctx);
            let duration = timer.finish();

            match result {
                Ok(items) => {
                    self.emit(
                        ProgressEvent::success(format!(
                            "{} finished in {} ({} ok, {} skipped, {} failed)",
                            step.label(),
                            format_duration(duration),
                            items.succeeded,
                            items.skipped,
                            items.failed
                        ))
                        .in_step(Some(step)),
                    );
                    summary.steps.push(StepRecord {
                        name: step,
                        status: StepStatus::Succeeded,
                        items,
                        duration,
                        message: None,
                    });
                }
                Err(Error::Cancelled) => {
                    self.emit(
                        ProgressEvent::warning(format!("{} stopped by request", step.label()))
                            .in_step(Some(step)),
                    );
                    summary.steps.push(StepRecord {
                        name: step,
                        status: StepStatus::Cancelled,
                        items: StepOutcome::default(),
                        duration,
                        message: None,
                    });
                    self.state = RunState::Cancelled;
                    break;
                }
                Err(e) => {
                    let fatal = step.is_fatal();
                    let message = e.to_string();
                    tracing::debug!("step {} failed: {:?}", step, e);
                    if fatal {
                        self.emit(
                            ProgressEvent::error(format!("{} failed: {}", step.label(), message))
                                .in_step(Some(step)),
                        );
                    } else {
                        self.emit(
                            ProgressEvent::warning(format!(
                                "{} failed: {}; continuing",
                                step.label(),
                                message
                            ))
                            .in_step(Some(step)),
                        );
                    }
                    summary.steps.push(StepRecord {
                        name: step,
                        status: StepStatus::Failed,
                        items: StepOutcome::default(),
                        duration,
                        message: Some(message),
                    });
                    if fatal {
                        summary.failed_step = Some(step);
                        self.state = RunState::Failed;
                        break;
                    }
                }
            }
        }

        if !self.state.is_terminal() {
            self.state = RunState::Completed;
        }
        summary.state = self.state;
        run_timer.finish();

        let severity = match self.state {
            RunState::Completed => Severity::Success,
            RunState::Cancelled => Severity::Warning,
            _ => Severity::Error,
        };
        self.emit(ProgressEvent::new(severity, summary.describe()));
        summary
    }

    fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event);
    }
}
