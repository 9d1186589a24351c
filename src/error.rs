//! Caller-facing error taxonomy.
//!
//! | Variant | Meaning | Recovery |
//! |---|---|---|
//! | `Validation` | structural, dimension, aspect or corruption failure | fix input, see suggestions |
//! | `Processing` | decode, encode or drawing-surface failure | per task |
//! | `Timeout` | pool deadline exceeded | retryable |
//! | `Aborted` | explicit cancellation | terminal for that task |
//! | `ContextTerminated` | the worker running the task crashed | task fails, pool self-heals |
//! | `PoolTerminated` | the pool is shut down | all pending work rejected |
//! | `DuplicateTask` | a task id is already queued or running | caller bug |

use crate::pool::TaskId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        suggestions: Vec<String>,
    },
    #[error("Processing failed: {0}")]
    Processing(String),
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),
    #[error("Operation aborted")]
    Aborted,
    #[error("Worker terminated while running the task: {0}")]
    ContextTerminated(String),
    #[error("Execution pool is terminated")]
    PoolTerminated,
    #[error("Task {0} is already queued or running")]
    DuplicateTask(TaskId),
}

impl ProcessError {
    /// Timeouts and worker crashes are transient; everything else needs a
    /// different input or a new pool.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessError::Timeout(_) | ProcessError::ContextTerminated(_)
        )
    }
}

impl From<crate::imaging::BackendError> for ProcessError {
    fn from(err: crate::imaging::BackendError) -> Self {
        ProcessError::Processing(err.to_string())
    }
}

impl From<crate::imaging::RasterError> for ProcessError {
    fn from(err: crate::imaging::RasterError) -> Self {
        ProcessError::Processing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProcessError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProcessError::ContextTerminated("panic".into()).is_retryable());
        assert!(!ProcessError::Aborted.is_retryable());
        assert!(!ProcessError::PoolTerminated.is_retryable());
        assert!(!ProcessError::Processing("bad".into()).is_retryable());
    }

    #[test]
    fn display_messages() {
        assert_eq!(ProcessError::Aborted.to_string(), "Operation aborted");
        assert_eq!(
            ProcessError::DuplicateTask(TaskId(7)).to_string(),
            "Task #7 is already queued or running"
        );
    }
}
