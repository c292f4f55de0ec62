//! Retry logic with exponential backoff for filesystem operations
//!
//! Destructive operations against cloud-synced or network roots (directory
//! delete, move, quarantine) can fail while a sync client briefly holds a
//! handle. This module provides:
//! - Error classification (retryable vs permanent)
//! - Exponential backoff with jitter
//! - Max retry limits (3 retries default)

pub mod classifier;
pub mod strategy;

pub use classifier::{ErrorClass, RetryClassifiable, classify_io_error};
pub use strategy::{RetryConfig, execute_with_backoff_sync};

/// Retry module result type
pub type Result<T> = std::result::Result<T, RetryError>;

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("Max retry attempts exceeded after {attempts} attempts: {last_error}")]
    MaxAttemptsExceeded { attempts: usize, last_error: String },

    #[error("Permanent error (not retryable): {0}")]
    PermanentError(String),
}

impl RetryError {
    /// True when the operation gave up because the resource stayed locked.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::MaxAttemptsExceeded { .. })
    }
}
