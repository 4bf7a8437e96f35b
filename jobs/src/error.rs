use alayasiki_core::error::{AlayasikiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("job does not belong to this user")]
    AccessDenied,
}

impl AlayasikiError for JobError {
    fn error_code(&self) -> ErrorCode {
        match self {
            JobError::NotFound => ErrorCode::NotFound,
            JobError::AccessDenied => ErrorCode::AccessDenied,
        }
    }
}
