//! Orchestrator-level error taxonomy.
//!
//! `TaskError` carries a stable [`ErrorCode`] alongside a human-readable
//! message, the same shape [`orbit_db::models::TaskErrorInfo`] persists to
//! the database, so that callers get typed errors for control flow without
//! re-parsing strings.

use orbit_db::models::{ErrorCode, TaskErrorInfo};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("no healthy agents available for capability: {0}")]
    NoAgentsAvailable(String),

    #[error("worker failure: {0}")]
    WorkerFailure(String),

    #[error("task timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("state store error: {0}")]
    StateStoreError(#[from] anyhow::Error),

    #[error("task was cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    ValidationError(String),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTaskType(_) => ErrorCode::UnknownTaskType,
            Self::NoAgentsAvailable(_) => ErrorCode::NoAgentsAvailable,
            Self::WorkerFailure(_) => ErrorCode::WorkerFailure,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::StateStoreError(_) => ErrorCode::StateStoreError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::ValidationError(_) => ErrorCode::ValidationError,
        }
    }

    pub fn to_task_error_info(&self) -> TaskErrorInfo {
        TaskErrorInfo::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_failure_is_retryable() {
        let err = TaskError::WorkerFailure("connection reset".into());
        let info = err.to_task_error_info();
        assert_eq!(info.code, ErrorCode::WorkerFailure);
        assert!(info.retryable);
    }

    #[test]
    fn unknown_task_type_is_not_retryable() {
        let err = TaskError::UnknownTaskType("bogus".into());
        let info = err.to_task_error_info();
        assert_eq!(info.code, ErrorCode::UnknownTaskType);
        assert!(!info.retryable);
    }

    #[test]
    fn state_store_error_wraps_anyhow() {
        let inner = anyhow::anyhow!("connection pool exhausted");
        let err: TaskError = inner.into();
        assert_eq!(err.code(), ErrorCode::StateStoreError);
        assert!(err.to_string().contains("connection pool exhausted"));
    }
}
