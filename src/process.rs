//! Centralized command execution with consistent error handling.
//!
//! Every external tool (image servicing, media creation, partitioning,
//! archive extraction) goes through [`Cmd`] and an [`Executor`]. The system
//! executor either captures output or streams it line by line into a
//! progress sink, turning percentage lines into progress updates.

use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::pipeline::StepName;
use crate::progress::{ProgressEvent, ProgressSink};

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\d.])(\d{1,3}(?:\.\d+)?)\s*%").unwrap());

/// Result of a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Exit code, or -1 if the process was terminated without one.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Where a command's output goes while it runs.
#[derive(Clone, Copy)]
pub enum OutputMode<'a> {
    /// Collect stdout/stderr silently.
    Captured,
    /// Relay each line to a sink as it arrives.
    Streaming(StreamTarget<'a>),
}

#[derive(Clone, Copy)]
pub struct StreamTarget<'a> {
    pub sink: &'a dyn ProgressSink,
    pub step: Option<StepName>,
    pub cancel: &'a CancelToken,
}

impl<'a> StreamTarget<'a> {
    pub fn new(
        sink: &'a dyn ProgressSink,
        step: Option<StepName>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self { sink, step, cancel }
    }

    /// Forward one line of tool output.
    pub fn relay_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let event = match parse_percent(line) {
            Some(value) => ProgressEvent::percent(value),
            None => ProgressEvent::info(line),
        };
        self.sink.emit(event.in_step(self.step));
    }
}

/// Runs external commands. The seam tests replace with a scripted fake.
pub trait Executor: Send + Sync {
    fn execute(&self, cmd: &Cmd, mode: OutputMode<'_>) -> Result<CommandResult>;
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom name used in the error when the command fails.
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Command line as it would be typed, for echoing to the user.
    pub fn display(&self) -> String {
        let mut line = quote(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }

    /// Run through `exec`. In streaming mode the command line is echoed first.
    pub fn run_with(&self, exec: &dyn Executor, mode: OutputMode<'_>) -> Result<CommandResult> {
        tracing::debug!("exec: {}", self.display());
        if let OutputMode::Streaming(target) = mode {
            target
                .sink
                .emit(ProgressEvent::command(self.display()).in_step(target.step));
        }

        let result = exec.execute(self, mode)?;

        if !result.success() {
            tracing::debug!(
                "'{}' exited with {}: {}",
                self.program,
                result.code,
                result.stderr_trimmed()
            );
            if !self.allow_fail {
                return Err(Error::ExternalToolNonZeroExit {
                    tool: self
                        .error_prefix
                        .clone()
                        .unwrap_or_else(|| self.program.clone()),
                    code: result.code,
                });
            }
        }
        Ok(result)
    }

    /// Run on the real system, capturing output.
    pub fn run(&self) -> Result<CommandResult> {
        self.run_with(&SystemExecutor, OutputMode::Captured)
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}

/// Executes commands with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn command(cmd: &Cmd) -> Command {
        let mut command = Command::new(cmd.program());
        command.args(cmd.get_args());
        if let Some(dir) = cmd.current_dir() {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command
    }

    fn launch_error(cmd: &Cmd, source: io::Error) -> Error {
        Error::ToolUnavailable {
            program: cmd.program().to_string(),
            source,
        }
    }

    fn stream(cmd: &Cmd, target: StreamTarget<'_>) -> Result<CommandResult> {
        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::launch_error(cmd, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut warned = false;

        let (stdout_text, stderr_text) = std::thread::scope(|scope| {
            let err_reader = scope.spawn(move || {
                let mut text = String::new();
                if let Some(pipe) = stderr {
                    let _ = for_each_line(BufReader::new(pipe), |line| {
                        target.relay_line(line);
                        text.push_str(line);
                        text.push('\n');
                    });
                }
                text
            });

            let mut text = String::new();
            if let Some(pipe) = stdout {
                let _ = for_each_line(BufReader::new(pipe), |line| {
                    if !warned && target.cancel.is_cancelled() {
                        warned = true;
                        target.sink.emit(
                            ProgressEvent::warning(format!(
                                "Stop requested; waiting for {} to finish",
                                cmd.program()
                            ))
                            .in_step(target.step),
                        );
                    }
                    target.relay_line(line);
                    text.push_str(line);
                    text.push('\n');
                });
            }
            (text, err_reader.join().unwrap_or_default())
        });

        let status = child.wait().map_err(|e| Self::launch_error(cmd, e))?;
        Ok(CommandResult {
            code: status.code().unwrap_or(-1),
            stdout: stdout_text,
            stderr: stderr_text,
        })
    }
}

impl Executor for SystemExecutor {
    fn execute(&self, cmd: &Cmd, mode: OutputMode<'_>) -> Result<CommandResult> {
        match mode {
            OutputMode::Captured => {
                let output = Self::command(cmd)
                    .output()
                    .map_err(|e| Self::launch_error(cmd, e))?;
                Ok(CommandResult {
                    code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            OutputMode::Streaming(target) => Self::stream(cmd, target),
        }
    }
}

/// Split a byte stream on `\r` as well as `\n`. Progress bars redraw with a
/// bare carriage return, so each redraw becomes its own line.
pub fn for_each_line<R: BufRead>(mut reader: R, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    on_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else if byte != 0 {
                pending.push(byte);
            }
        }
        reader.consume(len);
    }
    if !pending.is_empty() {
        on_line(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}

/// Extract a completion percentage from a line of tool output.
pub fn parse_percent(line: &str) -> Option<f32> {
    let caps = PERCENT_RE.captures(line)?;
    let value: f32 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Absolute or relative paths are checked directly, bare names through PATH.
pub fn locate(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() > 1 {
        return path.exists().then(|| path.to_path_buf());
    }
    which(program)
}

// =============================================================================
// Tests
// =============================================================================
