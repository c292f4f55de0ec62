//! Error types for provisioning operations
//!
//! Structural problems (malformed template, schema violations, unsafe path
//! segments, missing configuration) surface as `Err(ProvisioningError)`.
//! Expected business outcomes (blocked guardrails, partial item failures)
//! never do; they are reported inside result values instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use mgf_utils_path_safety::PathSafetyError;

use crate::config::ConfigError;
use crate::retry::classifier::{
    ErrorClass, PermanentError, RetryClassifiable, classify_io_error,
};

/// Provisioning result type alias
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Provisioning error taxonomy
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove directory {path}: {source}")]
    DirectoryRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Failed to serialize JSON: {source}")]
    JsonSerialize { source: serde_json::Error },

    #[error("Failed to deserialize JSON from {path}: {source}")]
    JsonDeserialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    // Template loading
    #[error("Schema not found at {0}")]
    SchemaNotFound(PathBuf),

    #[error("Remote schema references are not allowed: {0}")]
    RemoteSchemaRejected(String),

    #[error("Template {path} failed schema validation:\n  - {details}")]
    SchemaValidationFailed { path: PathBuf, details: String },

    #[error("Malformed template {path}: {reason}")]
    MalformedTemplate { path: PathBuf, reason: String },

    // Planning
    #[error("Invalid template structure: {0}")]
    InvalidTemplate(String),

    #[error("Unsafe path: {0}")]
    UnsafePath(#[from] PathSafetyError),

    #[error("Duplicate relative path in plan: {0}")]
    DuplicatePath(String),

    #[error("Top-level folder '{0}' must start with a two-digit prefix (NN_)")]
    InvalidTopLevelName(String),

    #[error("'.mgf' is only allowed directly under the top-level 00_Admin folder (found at {0})")]
    MisplacedAdminFolder(String),

    #[error("Token '{0}' is referenced by the template but has no value")]
    MissingToken(String),

    #[error("Unknown placeholder '{{{0}}}' in name '{1}'")]
    UnknownPlaceholder(String, String),

    #[error("Root name '{0}' cannot depend on more than one editor")]
    MultiEditorRootName(String),

    #[error("Base path must be absolute: {0}")]
    BasePathNotAbsolute(PathBuf),

    // Configuration / root integrity
    #[error("No root path configured for {0}")]
    MissingRootPath(String),

    #[error("Root path does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("No active integrity contract for provider '{provider_key}' root '{root_key}'")]
    MissingContract {
        provider_key: String,
        root_key: String,
    },

    #[error("Repair requires a quarantine relative path")]
    MissingQuarantinePath,

    #[error("Quarantine path '{0}' does not resolve strictly inside the root")]
    QuarantineOutsideRoot(String),

    #[error("Invalid job payload: {0}")]
    InvalidJobPayload(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ProvisioningError {
    /// The underlying I/O error, when this is a filesystem failure.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            ProvisioningError::FileWrite { source, .. }
            | ProvisioningError::FileRead { source, .. }
            | ProvisioningError::DirectoryRead { source, .. }
            | ProvisioningError::DirectoryCreate { source, .. }
            | ProvisioningError::DirectoryRemove { source, .. }
            | ProvisioningError::Move { source, .. }
            | ProvisioningError::Copy { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl RetryClassifiable for ProvisioningError {
    fn classify(&self) -> ErrorClass {
        match self.io_source() {
            Some(source) => classify_io_error(source),
            None => ErrorClass::Permanent(PermanentError::InvalidInput {
                field: "input".to_string(),
                reason: self.to_string(),
            }),
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        None
    }
}
