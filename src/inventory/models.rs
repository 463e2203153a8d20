//! Inventory models

use serde::{Deserialize, Serialize};

/// A deployment environment: a named set of targets plus shared config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name; also the unit of on-disk isolation
    pub name: String,

    /// Enabled services
    #[serde(default)]
    pub services: Services,

    /// Shared configuration applied to every target
    pub config: EnvConfig,

    /// Managed machines
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Services enabled for an environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Services {
    #[serde(default)]
    pub web: bool,
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub monitoring: bool,
}

/// Environment-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub app_name: String,
    pub app_repo: String,
    pub app_branch: String,
    pub runtime_version: String,
    #[serde(default)]
    pub app_port: u16,
    pub deploy_user: String,
    #[serde(default)]
    pub timezone: String,
}

/// One managed machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Stable name; primary key within the environment
    pub name: String,

    /// Network address
    pub address: String,

    /// SSH transport port
    pub port: u16,

    /// Operator account on the target
    pub user: String,

    /// Path to the private key; `~` expands to the operator's home
    pub key_path: String,

    /// Declared role
    #[serde(default)]
    pub kind: TargetKind,

    /// Port the application listens on, if declared
    #[serde(default)]
    pub app_port: u16,

    /// Externally reachable HTTP port, if declared
    #[serde(default)]
    pub http_port: u16,

    /// Whether the CM engine should escalate privileges on this target
    #[serde(default)]
    pub escalate: bool,
}

/// Target role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Web,
    Db,
    Monitoring,
}
