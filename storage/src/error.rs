use alayasiki_core::error::{AlayasikiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store returned an error after retries: {0}")]
    Rejected(String),
    #[error("store request timed out")]
    Timeout,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("index {0} not found")]
    IndexNotFound(String),
}

impl AlayasikiError for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::Timeout => ErrorCode::Timeout,
            StoreError::IndexNotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::StoreError,
        }
    }
}
