//! Status models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unknown,
    NotReady,
    Ready,
    Provisioning,
    Provisioned,
    Deploying,
    Deployed,
    Verifying,
    Failed,
}

impl ServerState {
    /// States that must not survive a controller restart.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServerState::Provisioning
                | ServerState::Deploying
                | ServerState::Verifying
                | ServerState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Unknown => "unknown",
            ServerState::NotReady => "not_ready",
            ServerState::Ready => "ready",
            ServerState::Provisioning => "provisioning",
            ServerState::Provisioned => "provisioned",
            ServerState::Deploying => "deploying",
            ServerState::Deployed => "deployed",
            ServerState::Verifying => "verifying",
            ServerState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of action runnable against a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Validate,
    Provision,
    Deploy,
    Check,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::Validate => "validate",
            ActionKind::Provision => "provision",
            ActionKind::Deploy => "deploy",
            ActionKind::Check => "check",
        };
        f.write_str(name)
    }
}

/// Readiness checks summarising whether a target's declared configuration is
/// usable at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyChecks {
    pub address_valid: bool,
    pub key_file_present: bool,
    pub port_valid: bool,
    pub fields_complete: bool,
}

impl ReadyChecks {
    pub fn is_ready(&self) -> bool {
        self.address_valid && self.key_file_present && self.port_valid && self.fields_complete
    }
}

/// Durable per-target status record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub state: ServerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionKind>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default)]
    pub ready_checks: ReadyChecks,
}

impl StatusRecord {
    /// A fresh record for a target the controller has not seen act yet.
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ServerState::Unknown,
            last_action: None,
            last_update: Utc::now(),
            error_message: String::new(),
            ready_checks: ReadyChecks::default(),
        }
    }
}
