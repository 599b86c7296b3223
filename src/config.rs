//! Tuning knobs of the path engine.

use crate::path_error::PathError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Maximum number of concurrent workers ranging over one shell.
    pub parallelism: usize,
    /// Predicted shell sizes up to this value use the plain map index.
    pub small_shell_threshold: usize,
    /// Shells at or below this distance are kept instead of recycled.
    pub retained_distances: i32,
    /// Warn once when a hashed index grows past `predicted * ratio`.
    pub overload_warn_ratio: f64,
    /// Extra attempts for a failed insert/update before the change is dropped.
    pub sync_retries: u32,
    /// Backoff unit between sync attempts, multiplied by the attempt number.
    pub sync_backoff_ms: u64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            small_shell_threshold: 32,
            retained_distances: 3,
            overload_warn_ratio: 2.0,
            sync_retries: 2,
            sync_backoff_ms: 5,
        }
    }
}

impl PathConfig {
    pub fn validate(&self) -> Result<(), PathError> {
        if self.parallelism == 0 {
            return Err(PathError::InvariantViolation(
                "parallelism must be at least 1".into(),
            ));
        }
        if !(self.overload_warn_ratio > 0.0) {
            return Err(PathError::InvariantViolation(format!(
                "overload_warn_ratio must be positive, got {}",
                self.overload_warn_ratio
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.sync_backoff_ms.saturating_mul(attempt as u64))
    }
}
