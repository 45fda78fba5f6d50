use crate::{crypto::CryptoError, db::DbError, scheduler::SchedulerError};

/// Error returned by the retention services.
///
/// Each variant maps to one client-visible error kind.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),
}

pub type RetentionResult<T> = Result<T, RetentionError>;

impl From<DbError> for RetentionError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => RetentionError::NotFound("Resource not found".into()),
            DbError::Validation(msg) => RetentionError::InvalidArgument(msg),
            DbError::Conflict(msg) => RetentionError::InvalidArgument(msg),
            other => RetentionError::Internal(other.to_string()),
        }
    }
}

impl From<SchedulerError> for RetentionError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Unauthorized => RetentionError::Unauthenticated,
            other => RetentionError::Internal(format!("Scheduler request failed: {other}")),
        }
    }
}

impl From<CryptoError> for RetentionError {
    fn from(e: CryptoError) -> Self {
        RetentionError::Internal(e.to_string())
    }
}
