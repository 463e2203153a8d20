//! Operator-tunable runtime options

use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::logs::LogLevel;
use crate::runner::tags;
use crate::storage::layout::StateLayout;

/// Runtime options persisted under the state root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOptions {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Verify deployments with a health probe
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,

    /// Worker pool size; 0 runs actions sequentially
    #[serde(default)]
    pub max_workers: usize,

    /// Lines of an engine log shown on failure
    #[serde(default = "default_log_retention")]
    pub log_retention_lines: usize,

    /// Default tag filter for provision actions
    #[serde(default = "default_provision_tags")]
    pub provisioning_tags: Vec<String>,

    /// Default tag filter for deploy actions
    #[serde(default = "default_deploy_tags")]
    pub deployment_tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_log_retention() -> usize {
    100
}

fn default_provision_tags() -> Vec<String> {
    tags::selected_tags(&tags::provision_catalog())
}

fn default_deploy_tags() -> Vec<String> {
    tags::selected_tags(&tags::deploy_catalog())
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            health_check_enabled: true,
            max_workers: 0,
            log_retention_lines: default_log_retention(),
            provisioning_tags: default_provision_tags(),
            deployment_tags: default_deploy_tags(),
        }
    }
}

impl ConfigOptions {
    /// Load options from the state root, falling back to defaults when the
    /// file is absent.
    pub async fn load(layout: &StateLayout) -> Result<Self, ControllerError> {
        let file = layout.options_file();
        if !file.exists().await {
            return Ok(Self::default());
        }

        let contents = file.read_string().await?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ControllerError::Config(format!("invalid options file: {e}")))
    }

    /// Persist options under the state root.
    pub async fn save(&self, layout: &StateLayout) -> Result<(), ControllerError> {
        let contents = serde_yaml::to_string(self)?;
        layout.options_file().write_string(&contents).await
    }

    /// The provision tag filter as the engine takes it.
    pub fn provision_tag_filter(&self) -> String {
        self.provisioning_tags.join(",")
    }

    /// The deploy tag filter as the engine takes it.
    pub fn deploy_tag_filter(&self) -> String {
        self.deployment_tags.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConfigOptions::default();
        assert!(options.health_check_enabled);
        assert_eq!(options.max_workers, 0);
        assert!(options.provision_tag_filter().contains("nginx"));
        assert_eq!(options.deploy_tag_filter(), "deploy,code,health");
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let options: ConfigOptions = serde_yaml::from_str("max_workers: 4\n").unwrap();
        assert_eq!(options.max_workers, 4);
        assert!(options.health_check_enabled);
        assert_eq!(options.log_retention_lines, 100);
    }
}
