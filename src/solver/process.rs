//! External solver process
//!
//! Runs `<executable> [args..] <settings.json>` and waits for it under a
//! timeout. The child is killed if the wait is abandoned.

use super::{AttributionSolver, SolverError, SolverJob};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr tail kept in an exit error
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct ProcessSolver {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessSolver {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before the settings path
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl AttributionSolver for ProcessSolver {
    async fn solve(&self, job: &SolverJob, settings_path: &Path) -> Result<(), SolverError> {
        debug!(
            "Launching {} for method {} with {}",
            self.executable.display(),
            job.method,
            settings_path.display()
        );

        let child = Command::new(&self.executable)
            .args(&self.args)
            .arg(settings_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SolverError::Spawn(format!("{}: {}", self.executable.display(), e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| SolverError::Exited {
                code: None,
                stderr: e.to_string(),
            })?,
            Err(_) => return Err(SolverError::Timeout(self.timeout)),
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail_start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        Err(SolverError::Exited {
            code: output.status.code(),
            stderr: stderr[tail_start..].to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dataset::PeriodLayout;
    use crate::hierarchy::{Dimension, HierarchyBuilder};
    use crate::labels::RandomLabels;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn job() -> SolverJob {
        let mut rng = StdRng::seed_from_u64(2);
        let mut labels = RandomLabels::new(&mut rng);
        let spec = HierarchyBuilder
            .build(&[Dimension::new("A", 1, 2)], &mut labels)
            .unwrap();
        SolverJob::new(&spec, &PeriodLayout::default(), "FPLP", "in.csv", "out.csv").unwrap()
    }

    fn shell(script: &str, timeout: Duration) -> ProcessSolver {
        // `sh -c script name settings` exposes the settings path as $1
        ProcessSolver::new("sh", timeout).with_args(vec![
            "-c".to_string(),
            script.to_string(),
            "solver".to_string(),
        ])
    }

    #[tokio::test]
    async fn test_successful_exit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("seen");
        let solver = shell(
            &format!("test -n \"$1\" && touch {}", marker.display()),
            Duration::from_secs(10),
        );
        solver.solve(&job(), Path::new("job.json")).await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_code_and_stderr() {
        let solver = shell("echo broken >&2; exit 3", Duration::from_secs(10));
        let err = solver.solve(&job(), Path::new("job.json")).await.unwrap_err();
        assert_eq!(
            err,
            SolverError::Exited {
                code: Some(3),
                stderr: "broken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_solver() {
        let solver = shell("sleep 30", Duration::from_millis(100));
        let err = solver.solve(&job(), Path::new("job.json")).await.unwrap_err();
        assert!(matches!(err, SolverError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let solver = ProcessSolver::new("/nonexistent/attribution-solver", Duration::from_secs(1));
        let err = solver.solve(&job(), Path::new("job.json")).await.unwrap_err();
        assert!(matches!(err, SolverError::Spawn(_)));
        assert!(!err.is_retryable());
    }
}
