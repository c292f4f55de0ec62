//! Root integrity: contracts, bounded measurement, scan/repair and the
//! job-payload adapter.

pub mod checker;
pub mod contract;
pub mod job;
pub mod measure;

pub use checker::{
    BlockedReason, EntryKind, IntegrityMode, IntegrityOverrides, RootIntegrityChecker,
    RootIntegrityEntry, RootIntegrityResult,
};
pub use contract::{
    ContractStore, InMemoryContractStore, JsonContractStore, RootIntegrityContract, load_contract,
};
pub use job::{IntegrityJobPayload, run_integrity_job};
pub use measure::{MeasureLimits, Measurement};

/// `rootKey` of a contract describing a whole domain root.
pub const ROOT_KEY_DOMAIN: &str = "domain_root";
