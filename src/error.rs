use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection drops and send failures. Retried internally by the
    /// connection manager; callers only observe these through the
    /// connection state.
    #[error("transport error: {0}")]
    Transport(String),

    /// Rejected locally before anything is submitted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Terminal for the caller; never retried.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The target changed underneath the caller (concurrently moderated or
    /// deleted). Refetch authoritative state instead of overwriting.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No ack arrived inside the bound. Retry is an explicit user action.
    #[error("operation timed out")]
    Timeout,

    #[error("not found")]
    NotFound,
}

impl AppError {
    /// Whether the connection manager may retry this internally. Business
    /// rule faults are always surfaced to the call site instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transport(_) | AppError::Timeout)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Validation(format!("payload: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Transport("connection reset".into()).is_retryable());
        assert!(AppError::Timeout.is_retryable());

        assert!(!AppError::Validation("empty".into()).is_retryable());
        assert!(!AppError::Authorization("not the sender".into()).is_retryable());
        assert!(!AppError::Conflict("moderated".into()).is_retryable());
        assert!(!AppError::NotFound.is_retryable());
    }
}
