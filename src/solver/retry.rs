//! Bounded retries with exponential backoff

use super::SolverError;
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Longest wait any configured delay may ask for (one week)
pub const MAX_WAIT_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Seconds to a duration without panicking: non-positive or NaN is zero,
/// anything too large for `Duration` saturates
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Rejects a wait that is negative, non-finite or longer than `MAX_WAIT_SECS`
pub fn check_wait_secs(name: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || !(0.0..=MAX_WAIT_SECS).contains(&secs) {
        return Err(SimError::Config(format!(
            "{} must be between 0 and {} seconds, got {}",
            name, MAX_WAIT_SECS, secs
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per method, including the first
    pub max_attempts: u32,
    pub initial_backoff_secs: f64,
    pub multiplier: f64,
    pub max_backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 5.0,
            multiplier: 2.0,
            max_backoff_secs: 60.0,
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_secs: 0.0,
            multiplier: 1.0,
            max_backoff_secs: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SimError::Config("max_attempts must be at least 1".to_string()));
        }
        check_wait_secs("initial_backoff_secs", self.initial_backoff_secs)?;
        check_wait_secs("max_backoff_secs", self.max_backoff_secs)?;
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SimError::Config(format!(
                "multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Wait after failed attempt `attempt` (1-based), capped at the maximum
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = (self.initial_backoff_secs * self.multiplier.powi(exponent))
            .min(self.max_backoff_secs);
        secs_to_duration(secs)
    }

    /// Runs `operation` until it succeeds, fails with a final error, or the
    /// attempts are used up. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> std::result::Result<T, SolverError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, SolverError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} on attempt {}/{}: {}; retrying in {:?}",
                        e.kind(),
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
