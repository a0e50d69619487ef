use std::path::PathBuf;
use thiserror::Error;

/// Raised by every cooperative wait when the run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Job-level errors. File-level failures never surface here; they are
/// recorded on the file's `LogEntry` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("failed to enumerate {}: {source}", .path.display())]
    Enumeration {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate job id {0}")]
    DuplicateJob(u32),

    #[error("invalid job selection: {0}")]
    Selection(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
