//! Error kinds raised by the image customization core.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required path (tool root, base image, source file) is absent.
    #[error("Missing prerequisite: {what} not found at {}", path.display())]
    MissingPrerequisite { what: String, path: PathBuf },

    /// The tool could not be launched at all, usually because it is not installed.
    #[error("Failed to execute '{program}'. Is it installed?")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The mount tool reported success but the sentinel directory never appeared.
    #[error("Mount reported success but {} does not exist", sentinel.display())]
    MountVerificationFailed { sentinel: PathBuf },

    #[error("'{tool}' failed (exit code {code})")]
    ExternalToolNonZeroExit { tool: String, code: i32 },

    #[error("Cancelled by request")]
    Cancelled,

    #[error("Another run is already active for {}", image_dir.display())]
    RunInProgress { image_dir: PathBuf },

    #[error("Pipeline worker panicked")]
    WorkerPanicked,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingPrerequisite {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Prerequisite-class errors are reported but never retried.
    pub fn is_prerequisite(&self) -> bool {
        matches!(
            self,
            Self::MissingPrerequisite { .. }
                | Self::ToolUnavailable { .. }
                | Self::MountVerificationFailed { .. }
        )
    }
}

/// Attach a path to an `io::Result`.
pub trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
