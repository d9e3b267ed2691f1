//! Exit codes for the CLI

use opqueue_core::{ConfigError, OpqueueError};
use opqueue_tasks::{DagError, QueueError};

use crate::cli::commands::TasksFailed;

/// Success
#[allow(dead_code)]
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Queue misuse: invalid concurrency, cycles, duplicate submission
pub const QUEUE_ERROR: i32 = 3;

/// One or more tasks failed
pub const TASK_FAILED: i32 = 4;

/// Map an error to the process exit code
pub fn from_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<TasksFailed>() {
            return TASK_FAILED;
        }
        if cause.is::<ConfigError>() {
            return CONFIG_ERROR;
        }
        if let Some(e) = cause.downcast_ref::<OpqueueError>() {
            if e.is_config() {
                return CONFIG_ERROR;
            }
        }
        if cause.is::<QueueError>() || cause.is::<DagError>() {
            return QUEUE_ERROR;
        }
    }
    ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_code() {
        let err: anyhow::Error = OpqueueError::from(ConfigError::DuplicateTask("a".into())).into();
        assert_eq!(from_error(&err), CONFIG_ERROR);
    }

    #[test]
    fn test_queue_error_code_through_context() {
        let err = anyhow::Error::from(QueueError::InvalidConcurrency).context("creating queue");
        assert_eq!(from_error(&err), QUEUE_ERROR);
    }

    #[test]
    fn test_task_failure_code() {
        let err: anyhow::Error = TasksFailed { failed: 2, total: 5 }.into();
        assert_eq!(from_error(&err), TASK_FAILED);
    }

    #[test]
    fn test_generic_error_code() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(from_error(&err), ERROR);
        assert_ne!(SUCCESS, ERROR);
    }
}
