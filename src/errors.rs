use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
    #[error("SOURCE_UNAVAILABLE: {0}")]
    SourceUnavailable(String),
    #[error("OVERLAY_UNAVAILABLE: {0}")]
    OverlayUnavailable(String),
    #[error("ACTION_FAILED: {0}")]
    ActionFailed(String),
    #[error("CONCURRENT_MUTATION: {0}")]
    ConcurrentMutation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
