//! Attribution Solver Boundary
//!
//! The solver under test is opaque: it reads a settings file and a dataset,
//! and writes a report table. This module owns the typed settings, the
//! process invocation and the classification of its failures.

pub mod job;
pub mod process;
pub mod retry;

pub use job::SolverJob;
pub use process::ProcessSolver;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Ways an external solver invocation can fail
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("solver exited with status {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("failed to start solver: {0}")]
    Spawn(String),

    #[error("solver produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("solver output is malformed: {0}")]
    MalformedOutput(String),
}

/// Coarse failure class, used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverFailureKind {
    Timeout,
    Failure,
    Unavailable,
}

impl fmt::Display for SolverFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverFailureKind::Timeout => write!(f, "SolverTimeout"),
            SolverFailureKind::Failure => write!(f, "SolverFailure"),
            SolverFailureKind::Unavailable => write!(f, "SolverUnavailable"),
        }
    }
}

impl SolverError {
    pub fn kind(&self) -> SolverFailureKind {
        match self {
            SolverError::Timeout(_) => SolverFailureKind::Timeout,
            SolverError::Spawn(_) => SolverFailureKind::Unavailable,
            SolverError::Exited { .. }
            | SolverError::MissingOutput(_)
            | SolverError::MalformedOutput(_) => SolverFailureKind::Failure,
        }
    }

    /// A solver that could not be started will not recover by waiting
    pub fn is_retryable(&self) -> bool {
        self.kind() != SolverFailureKind::Unavailable
    }
}

/// An attribution solver under test
#[async_trait]
pub trait AttributionSolver: Send + Sync {
    /// Runs one job. `settings_path` holds the job serialized as JSON; on
    /// success the report is expected at `job.output_path`.
    async fn solve(&self, job: &SolverJob, settings_path: &Path) -> Result<(), SolverError>;
}

#[async_trait]
impl<T: AttributionSolver + ?Sized> AttributionSolver for std::sync::Arc<T> {
    async fn solve(&self, job: &SolverJob, settings_path: &Path) -> Result<(), SolverError> {
        (**self).solve(job, settings_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            SolverError::Timeout(Duration::from_secs(1)).kind(),
            SolverFailureKind::Timeout
        );
        assert_eq!(
            SolverError::Exited {
                code: Some(2),
                stderr: String::new()
            }
            .kind(),
            SolverFailureKind::Failure
        );
        assert_eq!(
            SolverError::Spawn("missing".to_string()).kind(),
            SolverFailureKind::Unavailable
        );
    }

    #[test]
    fn test_only_spawn_failures_are_final() {
        assert!(SolverError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SolverError::MissingOutput(PathBuf::from("out.csv")).is_retryable());
        assert!(SolverError::MalformedOutput("bad".to_string()).is_retryable());
        assert!(!SolverError::Spawn("missing".to_string()).is_retryable());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SolverFailureKind::Timeout.to_string(), "SolverTimeout");
        assert_eq!(SolverFailureKind::Failure.to_string(), "SolverFailure");
    }
}
