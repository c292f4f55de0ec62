//! Project record, status lifecycle and eligibility gates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::template::ProvisioningTokens;

/// Maximum number of audit entries kept on a project.
pub const AUDIT_LOG_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    Real,
    Test,
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    ReadyToProvision,
    Provisioning,
    Provisioned,
    ProvisionFailed,
    Active,
    Archiving,
    Archived,
    ArchiveFailed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::ReadyToProvision => "ready_to_provision",
            ProjectStatus::Provisioning => "provisioning",
            ProjectStatus::Provisioned => "provisioned",
            ProjectStatus::ProvisionFailed => "provision_failed",
            ProjectStatus::Active => "active",
            ProjectStatus::Archiving => "archiving",
            ProjectStatus::Archived => "archived",
            ProjectStatus::ArchiveFailed => "archive_failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a project may not start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateBlock {
    NonRealData,
    StatusNotReady,
    AlreadyProvisioning,
    AlreadyArchiving,
}

/// Which lifecycle operation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Bootstrap,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub at: DateTime<Utc>,
    pub succeeded: bool,
    pub status_after: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// The business entity the orchestrators act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default)]
    pub editor_initials: Vec<String>,
    pub data_classification: DataClassification,
    pub status: ProjectStatus,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
}

impl ProjectRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            client_name: None,
            editor_initials: Vec::new(),
            data_classification: DataClassification::Real,
            status: ProjectStatus::ReadyToProvision,
            audit_log: Vec::new(),
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client_name = Some(client.into());
        self
    }

    pub fn with_editors<I, S>(mut self, editors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.editor_initials = editors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn tokens(&self) -> ProvisioningTokens {
        let tokens = ProvisioningTokens::new()
            .with_project_code(&self.code)
            .with_project_name(&self.name)
            .with_editor_initials(&self.editor_initials);
        match &self.client_name {
            Some(client) => tokens.with_client_name(client),
            None => tokens,
        }
    }

    fn classification_gate(&self, allow_non_real: bool) -> Option<GateBlock> {
        (self.data_classification != DataClassification::Real && !allow_non_real)
            .then_some(GateBlock::NonRealData)
    }

    /// Gate for a new bootstrap run. Classification is checked first.
    pub fn bootstrap_gate(&self, allow_non_real: bool) -> Option<GateBlock> {
        self.classification_gate(allow_non_real).or(match self.status {
            ProjectStatus::ReadyToProvision
            | ProjectStatus::ProvisionFailed
            | ProjectStatus::Provisioned
            | ProjectStatus::Active => None,
            ProjectStatus::Provisioning => Some(GateBlock::AlreadyProvisioning),
            _ => Some(GateBlock::StatusNotReady),
        })
    }

    /// Gate for a new archive run. Classification is checked first.
    pub fn archive_gate(&self, allow_non_real: bool) -> Option<GateBlock> {
        self.classification_gate(allow_non_real).or(match self.status {
            ProjectStatus::Provisioned
            | ProjectStatus::Active
            | ProjectStatus::ArchiveFailed => None,
            ProjectStatus::Archiving => Some(GateBlock::AlreadyArchiving),
            _ => Some(GateBlock::StatusNotReady),
        })
    }

    /// Record a finished run. `status_after` of `None` leaves the status
    /// alone (gate-blocked runs).
    pub fn record_run(
        &mut self,
        kind: AuditKind,
        succeeded: bool,
        status_after: Option<ProjectStatus>,
        last_error: Option<String>,
    ) {
        if let Some(status) = status_after {
            self.status = status;
        }
        self.audit_log.push(AuditEntry {
            kind,
            at: Utc::now(),
            succeeded,
            status_after: self.status,
            last_error,
        });
        if self.audit_log.len() > AUDIT_LOG_LIMIT {
            let excess = self.audit_log.len() - AUDIT_LOG_LIMIT;
            self.audit_log.drain(..excess);
        }
    }
}
