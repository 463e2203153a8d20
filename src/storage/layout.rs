//! On-disk layout of controller state
//!
//! Every durable file the controller owns lives under a configurable state
//! root, isolated per environment:
//!
//! ```text
//! <root>/inventory/<env>/config.yml          operator-authored environment
//! <root>/inventory/<env>/hosts.yml           generated CM-engine inventory
//! <root>/inventory/<env>/.status/servers.json
//! <root>/inventory/<env>/.queue/actions.json
//! <root>/logs/<env>/                         per-invocation engine logs
//! <root>/config-options.yml                  operator runtime options
//! ```

use std::path::PathBuf;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// State layout for the controller
#[derive(Debug, Clone)]
pub struct StateLayout {
    /// Base directory for all state
    pub base_dir: PathBuf,
}

impl StateLayout {
    /// Create a new state layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get an environment's inventory directory
    pub fn env_dir(&self, environment: &str) -> Dir {
        Dir::new(self.base_dir.join("inventory").join(environment))
    }

    /// Get an environment's config file
    pub fn config_file(&self, environment: &str) -> File {
        self.env_dir(environment).file("config.yml")
    }

    /// Get an environment's generated CM-engine inventory
    pub fn hosts_file(&self, environment: &str) -> File {
        self.env_dir(environment).file("hosts.yml")
    }

    /// Get an environment's status document
    pub fn status_file(&self, environment: &str) -> File {
        self.env_dir(environment).subdir(".status").file("servers.json")
    }

    /// Get an environment's action queue document
    pub fn queue_file(&self, environment: &str) -> File {
        self.env_dir(environment).subdir(".queue").file("actions.json")
    }

    /// Get an environment's engine log directory
    pub fn logs_dir(&self, environment: &str) -> Dir {
        Dir::new(self.base_dir.join("logs").join(environment))
    }

    /// Get the runtime options file
    pub fn options_file(&self) -> File {
        File::new(self.base_dir.join("config-options.yml"))
    }

    /// Setup the layout for one environment (create directories)
    pub async fn setup(&self, environment: &str) -> Result<(), ControllerError> {
        self.env_dir(environment).create().await?;
        self.env_dir(environment).subdir(".status").create().await?;
        self.env_dir(environment).subdir(".queue").create().await?;
        self.logs_dir(environment).create().await?;
        Ok(())
    }
}

impl Default for StateLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
