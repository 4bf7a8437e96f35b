use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthenticated,
    NotFound,
    AccessDenied,
    InvalidInput,
    FileTooLarge,
    Timeout,
    EmbeddingUnavailable,
    WorkerCrashed,
    StoreError,
    UpstreamError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
            ErrorCode::WorkerCrashed => "WORKER_CRASHED",
            ErrorCode::StoreError => "STORE_ERROR",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Implemented by every crate-local error enum so callers can branch on a
/// stable kind without matching concrete variants across crate boundaries.
pub trait AlayasikiError: std::error::Error {
    fn error_code(&self) -> ErrorCode;
}
