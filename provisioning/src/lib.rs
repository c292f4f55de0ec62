//! Storage-root provisioning, project lifecycle and root integrity.
//!
//! Folder structures are described by JSON templates, validated against a
//! bundled schema and expanded with project tokens into a deterministic
//! plan. The plan executor materializes or verifies that plan on a target
//! root. On top of that sit the bootstrap and archive orchestrators, which
//! drive each configured storage domain through a project's lifecycle, and
//! the root integrity checker, which quarantines what does not belong in a
//! domain root.
//!
//! All filesystem work is synchronous. Expected business outcomes (blocked
//! guardrails, partial failures) come back as result values; only
//! structural or configuration problems are errors.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod archive;
pub mod bootstrap;
pub mod cleanup;
pub mod config;
pub mod content;
pub mod diagnostics;
pub mod domains;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod integrity;
pub mod manifest;
pub mod project;
pub mod provision;
pub mod retry;
pub mod template;
pub mod timing;

pub use archive::{ArchiveOptions, ArchiveOrchestrator, ArchiveResult, ArchiveState};
pub use bootstrap::{BootstrapOptions, BootstrapOrchestrator, BootstrapResult, RootState};
pub use config::{ConfigLoader, EngineConfig};
pub use diagnostics::{Diagnostics, MemoryDiagnostics, NullDiagnostics, TracingDiagnostics};
pub use domains::{DomainDefinition, DomainKey, RootResolver, StorageRootRegistration};
pub use error::{ProvisioningError, Result};
pub use executor::{ExecutionMode, ExecutionResult, execute};
pub use integrity::{
    IntegrityMode, RootIntegrityChecker, RootIntegrityContract, RootIntegrityResult,
};
pub use project::{DataClassification, ProjectRecord, ProjectStatus};
pub use provision::{FolderProvisioner, Placement, ProvisioningRequest, ProvisioningSummary};
pub use template::{FolderPlan, FolderTemplate, ProvisioningTokens};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
