use crate::catalog::models::ProcessingState;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Source file missing: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("Analysis failed for {}: {message}", path.display())]
    Analysis {
        path: PathBuf,
        message: String,
        detail: String,
    },

    #[error(
        "Invariant violation on package {package}: expected state {}, found {}",
        display_state(.expected),
        display_state(.found)
    )]
    InvariantViolation {
        package: String,
        expected: Option<ProcessingState>,
        found: Option<ProcessingState>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Unknown measurement kind: {0}")]
    UnknownMeasurementKind(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Analysis of {} did not finish within {secs}s", path.display())]
    DeadlineExceeded { path: PathBuf, secs: u64 },
}

impl Error {
    /// Build an analysis failure from any displayable engine error.
    pub fn analysis(
        path: impl Into<PathBuf>,
        err: impl std::fmt::Debug + std::fmt::Display,
    ) -> Self {
        Error::Analysis {
            path: path.into(),
            message: err.to_string(),
            detail: format!("{:?}", err),
        }
    }

    /// Long-form detail for operator-facing failure reports.
    pub fn detail(&self) -> String {
        match self {
            Error::Analysis { detail, .. } => detail.clone(),
            other => format!("{:?}", other),
        }
    }
}

fn display_state(state: &Option<ProcessingState>) -> &'static str {
    state.map(ProcessingState::as_str).unwrap_or("none")
}
