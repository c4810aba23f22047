//! Progress relay between the pipeline worker and whoever is watching.
//!
//! The worker pushes tagged [`ProgressEvent`]s into a [`ProgressSink`]. Two
//! sinks exist: [`QueueSink`] hands events to another thread which polls a
//! [`RelayReceiver`] at a short interval, and [`ConsoleSink`] renders
//! synchronously for commands that run on the main thread.
//!
//! Rendering follows one rule for percentages: a percent event for the same
//! step as the previous percent line rewrites that line in place, anything
//! else starts a new line.

use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::pipeline::StepName;

/// How often the console loop polls the relay.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    /// Echo of an external command line about to run.
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub severity: Severity,
    pub message: String,
    /// Present only for progress-bar updates, always within 0..=100.
    pub percent: Option<f32>,
    pub step: Option<StepName>,
}

impl ProgressEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            percent: None,
            step: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn command(line: impl Into<String>) -> Self {
        Self::new(Severity::Command, line)
    }

    pub fn percent(value: f32) -> Self {
        let value = value.clamp(0.0, 100.0);
        Self {
            severity: Severity::Info,
            message: format!("progress: {:.1}%", value),
            percent: Some(value),
            step: None,
        }
    }

    /// Tag the event with the step that produced it.
    pub fn in_step(mut self, step: Option<StepName>) -> Self {
        self.step = step;
        self
    }

    pub fn is_percent(&self) -> bool {
        self.percent.is_some()
    }
}

/// Destination for progress events. Implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that keeps every event in memory, for callers that inspect the log afterwards.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl ProgressSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn relay() -> (QueueSink, RelayReceiver) {
    let (tx, rx) = mpsc::channel();
    (QueueSink { tx }, RelayReceiver { rx })
}

/// Producer half, owned by the worker.
#[derive(Clone)]
pub struct QueueSink {
    tx: Sender<ProgressEvent>,
}

impl ProgressSink for QueueSink {
    fn emit(&self, event: ProgressEvent) {
        // A vanished consumer must not stop the build.
        let _ = self.tx.send(event);
    }
}

/// Events collected by one poll.
#[derive(Debug, Default)]
pub struct Batch {
    pub events: Vec<ProgressEvent>,
    /// The producer is gone and the queue is empty.
    pub closed: bool,
}

/// Consumer half, polled by the console or UI loop.
pub struct RelayReceiver {
    rx: Receiver<ProgressEvent>,
}

impl RelayReceiver {
    /// Wait up to `wait` for the first event, then drain whatever is queued.
    pub fn poll(&self, wait: Duration) -> Batch {
        let mut batch = Batch::default();
        match self.rx.recv_timeout(wait) {
            Ok(event) => batch.events.push(event),
            Err(RecvTimeoutError::Timeout) => return batch,
            Err(RecvTimeoutError::Disconnected) => {
                batch.closed = true;
                return batch;
            }
        }
        while let Ok(event) = self.rx.try_recv() {
            batch.events.push(event);
        }
        batch
    }

    /// Take everything queued right now without waiting.
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.rx.try_iter().collect()
    }
}

/// Writes events as a line log, collapsing same-step percent updates.
pub struct ConsoleRenderer<W: Write> {
    out: W,
    /// Step of the percent line currently open (not yet terminated).
    open_percent: Option<Option<StepName>>,
    open_width: usize,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            open_percent: None,
            open_width: 0,
        }
    }

    pub fn render(&mut self, event: &ProgressEvent) -> io::Result<()> {
        let text = format_line(event);

        if event.is_percent() {
            match self.open_percent {
                Some(step) if step == event.step => {
                    let pad = self.open_width.saturating_sub(text.chars().count());
                    write!(self.out, "\r{}{}", text, " ".repeat(pad))?;
                }
                Some(_) => {
                    writeln!(self.out)?;
                    write!(self.out, "{}", text)?;
                }
                None => write!(self.out, "{}", text)?,
            }
            self.open_percent = Some(event.step);
            self.open_width = text.chars().count();
        } else {
            self.close_line()?;
            writeln!(self.out, "{}", text)?;
        }
        self.out.flush()
    }

    /// Terminate a dangling percent line.
    pub fn finish(&mut self) -> io::Result<()> {
        self.close_line()?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn close_line(&mut self) -> io::Result<()> {
        if self.open_percent.take().is_some() {
            writeln!(self.out)?;
            self.open_width = 0;
        }
        Ok(())
    }
}

fn format_line(event: &ProgressEvent) -> String {
    match event.severity {
        Severity::Info => format!("  {}", event.message),
        Severity::Success => format!("[OK] {}", event.message),
        Severity::Warning => format!("[WARN] {}", event.message),
        Severity::Error => format!("[ERROR] {}", event.message),
        Severity::Command => format!("  $ {}", event.message),
    }
}

/// Sink that renders straight to stdout on the calling thread.
pub struct ConsoleSink {
    renderer: Mutex<ConsoleRenderer<io::Stdout>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            renderer: Mutex::new(ConsoleRenderer::new(io::stdout())),
        }
    }

    pub fn finish(&self) {
        if let Ok(mut renderer) = self.renderer.lock() {
            let _ = renderer.finish();
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut renderer) = self.renderer.lock() {
            let _ = renderer.render(&event);
        }
    }
}

/// Detects long silences on the relay. Warns once per silence, never aborts.
#[derive(Debug)]
pub struct StallMonitor {
    threshold: Duration,
    last_activity: Instant,
    warned: bool,
}

impl StallMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_activity: now,
            warned: false,
        }
    }

    pub fn observe(&mut self, saw_events: bool, now: Instant) -> Option<ProgressEvent> {
        if saw_events {
            self.last_activity = now;
            self.warned = false;
            return None;
        }
        let silent = now.saturating_duration_since(self.last_activity);
        if !self.warned && silent >= self.threshold {
            self.warned = true;
            return Some(ProgressEvent::warning(format!(
                "No output for {}s; the current tool is still running",
                silent.as_secs()
            )));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(events: &[ProgressEvent]) -> String {
        let mut renderer = ConsoleRenderer::new(Vec::new());
        for event in events {
            renderer.render(event).unwrap();
        }
        renderer.finish().unwrap();
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(ProgressEvent::percent(140.0).percent, Some(100.0));
        assert_eq!(ProgressEvent::percent(-3.0).percent, Some(0.0));
    }

    #[test]
    fn test_same_step_percent_updates_in_place() {
        let step = Some(StepName::FeaturePackages);
        let out = render_all(&[
            ProgressEvent::percent(10.0).in_step(step),
            ProgressEvent::percent(55.5).in_step(step),
            ProgressEvent::percent(100.0).in_step(step),
        ]);

        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("\r  progress: 55.5%"));
        assert!(out.ends_with("progress: 100.0%\n"));
    }

    #[test]
    fn test_percent_for_other_step_starts_new_line() {
        let out = render_all(&[
            ProgressEvent::percent(40.0).in_step(Some(StepName::FeaturePackages)),
            ProgressEvent::percent(20.0).in_step(Some(StepName::LanguagePackages)),
        ]);

        assert!(!out.contains('\r'));
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_log_line_closes_percent_line() {
        let step = Some(StepName::Drivers);
        let out = render_all(&[
            ProgressEvent::percent(40.0).in_step(step),
            ProgressEvent::info("The operation completed successfully.").in_step(step),
            ProgressEvent::percent(10.0).in_step(step),
        ]);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "  progress: 40.0%");
        assert_eq!(lines[2], "  progress: 10.0%");
    }

    #[test]
    fn test_shorter_update_overwrites_longer_one() {
        let step = Some(StepName::Mount);
        let out = render_all(&[
            ProgressEvent::percent(100.0).in_step(step),
            ProgressEvent::percent(5.0).in_step(step),
        ]);
        assert!(out.contains("\r  progress: 5.0% "));
    }

    #[test]
    fn test_relay_preserves_fifo_order() {
        let (sink, receiver) = relay();
        for i in 0..5 {
            sink.emit(ProgressEvent::info(format!("line {}", i)));
        }

        let batch = receiver.poll(Duration::from_millis(10));
        let messages: Vec<_> = batch.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["line 0", "line 1", "line 2", "line 3", "line 4"]);
        assert!(!batch.closed);
    }

    #[test]
    fn test_relay_reports_closed_after_producer_drops() {
        let (sink, receiver) = relay();
        sink.emit(ProgressEvent::info("last"));
        drop(sink);

        assert_eq!(receiver.drain().len(), 1);
        assert!(receiver.poll(Duration::from_millis(10)).closed);
    }

    #[test]
    fn test_relay_crosses_threads() {
        let (sink, receiver) = relay();
        let worker = std::thread::spawn(move || {
            for i in 0..100 {
                sink.emit(ProgressEvent::percent(i as f32));
            }
        });
        worker.join().unwrap();

        let events = receiver.drain();
        assert_eq!(events.len(), 100);
        assert_eq!(events[99].percent, Some(99.0));
    }

    #[test]
    fn test_stall_monitor_warns_once_per_silence() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(Duration::from_secs(60), start);

        assert!(monitor.observe(false, start + Duration::from_secs(30)).is_none());
        let warning = monitor.observe(false, start + Duration::from_secs(61));
        assert_eq!(warning.map(|e| e.severity), Some(Severity::Warning));
        assert!(monitor.observe(false, start + Duration::from_secs(200)).is_none());

        // Activity re-arms the monitor.
        assert!(monitor.observe(true, start + Duration::from_secs(201)).is_none());
        assert!(monitor
            .observe(false, start + Duration::from_secs(262))
            .is_some());
    }
}
