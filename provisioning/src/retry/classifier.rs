//! Error classification for retry decisions

use std::io::ErrorKind;
use std::time::Duration;

/// Top-level error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that should be retried with backoff
    Retryable(RetryableError),

    /// Permanent errors that should NOT be retried
    Permanent(PermanentError),
}

/// Transient errors (retry recommended)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    #[error("File or directory locked by another process")]
    FileLocked,

    #[error("Directory not empty (concurrent writer)")]
    DirectoryBusy,

    #[error("Operation interrupted or timed out")]
    Interrupted,
}

/// Permanent errors (do NOT retry)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermanentError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid input in field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("I/O failure: {0}")]
    Io(String),
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }

    fn suggested_backoff(&self) -> Option<Duration>;
}

/// Windows `ERROR_SHARING_VIOLATION` / `ERROR_LOCK_VIOLATION`.
const WINDOWS_LOCK_CODES: [i32; 2] = [32, 33];

/// Classify a `std::io::Error` by kind.
///
/// `PermissionDenied` is treated as a handle held by a sync client.
pub fn classify_io_error(err: &std::io::Error) -> ErrorClass {
    if err
        .raw_os_error()
        .is_some_and(|code| cfg!(windows) && WINDOWS_LOCK_CODES.contains(&code))
    {
        return ErrorClass::Retryable(RetryableError::FileLocked);
    }

    match err.kind() {
        ErrorKind::ResourceBusy | ErrorKind::PermissionDenied | ErrorKind::WouldBlock => {
            ErrorClass::Retryable(RetryableError::FileLocked)
        }
        ErrorKind::DirectoryNotEmpty => ErrorClass::Retryable(RetryableError::DirectoryBusy),
        ErrorKind::Interrupted | ErrorKind::TimedOut => {
            ErrorClass::Retryable(RetryableError::Interrupted)
        }
        ErrorKind::NotFound => {
            ErrorClass::Permanent(PermanentError::ResourceNotFound(err.to_string()))
        }
        ErrorKind::InvalidInput | ErrorKind::InvalidData => {
            ErrorClass::Permanent(PermanentError::InvalidInput {
                field: "io".to_string(),
                reason: err.to_string(),
            })
        }
        _ => ErrorClass::Permanent(PermanentError::Io(err.to_string())),
    }
}

impl RetryClassifiable for std::io::Error {
    fn classify(&self) -> ErrorClass {
        classify_io_error(self)
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        None
    }
}
