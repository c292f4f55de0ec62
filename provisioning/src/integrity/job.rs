//! Job-payload adapter for integrity runs.
//!
//! A job row carries a JSON payload; the run's outcome is written back into
//! the same object under `result`, or under `error` when the run could not
//! start or hit a configuration error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checker::{IntegrityMode, IntegrityOverrides, RootIntegrityChecker, RootIntegrityResult};
use super::contract::{ContractStore, load_contract};
use super::ROOT_KEY_DOMAIN;
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::domains::{DomainKey, RootResolution, RootResolver};
use crate::error::{ProvisioningError, Result};

/// Parsed form of an integrity job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityJobPayload {
    pub provider_key: String,
    #[serde(default = "default_root_key")]
    pub root_key: String,
    #[serde(default)]
    pub mode: IntegrityMode,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub force_sandbox: bool,
    #[serde(flatten)]
    pub overrides: IntegrityOverrides,
}

fn default_root_key() -> String {
    ROOT_KEY_DOMAIN.to_string()
}

fn default_dry_run() -> bool {
    true
}

impl IntegrityJobPayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| ProvisioningError::InvalidJobPayload(e.to_string()))
    }
}

/// Run the job described by `payload` and record the outcome in it.
///
/// The contract is read from `store` for this run only.
pub fn run_integrity_job(
    payload: &mut Value,
    store: &dyn ContractStore,
    config: &EngineConfig,
    diagnostics: &dyn Diagnostics,
) -> Result<RootIntegrityResult> {
    let outcome = execute(payload, store, config, diagnostics);
    if let Value::Object(map) = payload {
        match &outcome {
            Ok(result) => {
                let value = serde_json::to_value(result)
                    .map_err(|e| ProvisioningError::JsonSerialize { source: e })?;
                map.remove("error");
                map.insert("result".to_string(), value);
            }
            Err(e) => {
                map.remove("result");
                map.insert("error".to_string(), Value::String(e.to_string()));
            }
        }
    }
    outcome
}

fn execute(
    payload: &Value,
    store: &dyn ContractStore,
    config: &EngineConfig,
    diagnostics: &dyn Diagnostics,
) -> Result<RootIntegrityResult> {
    if !payload.is_object() {
        return Err(ProvisioningError::InvalidJobPayload(
            "payload must be a JSON object".to_string(),
        ));
    }
    let job = IntegrityJobPayload::from_value(payload)?;
    let domain: DomainKey = job
        .provider_key
        .parse()
        .map_err(ProvisioningError::InvalidJobPayload)?;
    let contract = load_contract(store, &job.provider_key, &job.root_key)?;

    let root = match RootResolver::new(config)
        .with_forced_sandbox(job.force_sandbox)
        .resolve(domain)
    {
        RootResolution::Resolved(path) => Some(path),
        RootResolution::Unconfigured => None,
        RootResolution::OutsideSandbox(path) => {
            return Err(ProvisioningError::MissingRootPath(format!(
                "{} (configured root {} is outside the sandbox)",
                job.provider_key,
                path.display()
            )));
        }
    };

    RootIntegrityChecker::new(diagnostics)
        .with_retry(config.cleanup_retry.clone())
        .run(&contract, root.as_deref(), job.mode, job.dry_run, &job.overrides)
}
