//! Remote state reconciliation
//!
//! Infers a target's lifecycle state from a fixed battery of idempotent shell
//! probes. Every probe command prints `yes` or `no` on stdout.

use async_trait::async_trait;

use crate::inventory::models::Target;
use crate::probe::ssh::{ConnectionTest, SshProbe};
use crate::status::models::ServerState;

/// Results of the provisioning probes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisioningChecks {
    pub runtime_installed: bool,
    pub web_server_installed: bool,
    pub version_manager_installed: bool,
    pub app_dir_exists: bool,
    pub all_provisioned: bool,
}

/// Results of the deployment probes
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentChecks {
    pub supervisor_running: bool,
    pub app_responding: bool,
    pub release_symlink: bool,
    pub all_deployed: bool,
}

/// The inferred state of one target
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub state: ServerState,
    pub message: String,
    pub provisioning: ProvisioningChecks,
    pub deployment: DeploymentChecks,
}

/// Probes a target and reports what is actually there
#[async_trait]
pub trait StateProbe: Send + Sync {
    /// Quick reachability test.
    async fn test_connection(&self, target: &Target) -> ConnectionTest;

    /// Full battery: provisioning probes, then deployment probes when
    /// provisioned, then the state decision.
    async fn detect(&self, target: &Target) -> DetectionResult;
}

/// State detector running its battery over SSH
pub struct SshStateDetector {
    ssh: SshProbe,
}

impl SshStateDetector {
    pub fn new() -> Self {
        Self {
            ssh: SshProbe::new(),
        }
    }

    async fn probe_yes(&self, target: &Target, command: &str) -> bool {
        let outcome = self
            .ssh
            .execute(
                &target.address,
                target.port,
                &target.user,
                &target.key_path,
                command,
            )
            .await;
        outcome.success && outcome.output.trim() == "yes"
    }

    async fn check_provisioning(&self, target: &Target) -> ProvisioningChecks {
        let user = &target.user;

        // The runtime is installed through the version manager; source its
        // init script before looking for the binary.
        let runtime_command = format!(
            r#"if [ -d "/home/{user}/.nvm" ]; then
  export NVM_DIR="/home/{user}/.nvm"
elif [ -d "$HOME/.nvm" ]; then
  export NVM_DIR="$HOME/.nvm"
else
  echo 'no' && exit 0
fi
[ -s "$NVM_DIR/nvm.sh" ] && . "$NVM_DIR/nvm.sh" && command -v node >/dev/null 2>&1 && echo 'yes' || echo 'no'"#
        );

        let mut checks = ProvisioningChecks {
            runtime_installed: self.probe_yes(target, &runtime_command).await,
            web_server_installed: self
                .probe_yes(
                    target,
                    "command -v nginx >/dev/null 2>&1 && echo 'yes' || echo 'no'",
                )
                .await,
            version_manager_installed: self
                .probe_yes(
                    target,
                    &format!(
                        "test -d /home/{user}/.nvm || test -d $HOME/.nvm && echo 'yes' || echo 'no'"
                    ),
                )
                .await,
            app_dir_exists: self
                .probe_yes(target, "test -d /var/www && echo 'yes' || echo 'no'")
                .await,
            all_provisioned: false,
        };

        checks.all_provisioned = checks.runtime_installed
            && checks.web_server_installed
            && checks.version_manager_installed
            && checks.app_dir_exists;
        checks
    }

    async fn check_deployment(&self, target: &Target) -> DeploymentChecks {
        let user = &target.user;
        let app_port = target.app_port;

        let supervisor_command = format!(
            r#"if [ -d "/home/{user}/.nvm" ]; then
  export NVM_DIR="/home/{user}/.nvm"
elif [ -d "$HOME/.nvm" ]; then
  export NVM_DIR="$HOME/.nvm"
else
  echo 'no' && exit 0
fi
[ -s "$NVM_DIR/nvm.sh" ] && . "$NVM_DIR/nvm.sh" && pm2 list 2>/dev/null | grep -q 'online' && echo 'yes' || echo 'no'"#
        );

        // Accept 200 or 307 from the app; fall back down the tool chain.
        let responding_command = format!(
            r#"if command -v curl >/dev/null 2>&1; then
  curl -s -o /dev/null -w '%{{http_code}}' http://localhost:{app_port}/ --max-time 3 2>/dev/null | grep -qE '200|307' && echo 'yes' || echo 'no'
elif command -v wget >/dev/null 2>&1; then
  wget -q -O /dev/null --timeout=3 http://localhost:{app_port}/ >/dev/null 2>&1 && echo 'yes' || echo 'no'
elif command -v nc >/dev/null 2>&1; then
  echo "GET / HTTP/1.0" | nc -w 3 localhost {app_port} >/dev/null 2>&1 && echo 'yes' || echo 'no'
else
  echo 'no'
fi"#
        );

        let mut checks = DeploymentChecks {
            supervisor_running: self.probe_yes(target, &supervisor_command).await,
            app_responding: self.probe_yes(target, &responding_command).await,
            release_symlink: self
                .probe_yes(
                    target,
                    "test -L /var/www/docker/current && echo 'yes' || echo 'no'",
                )
                .await,
            all_deployed: false,
        };

        // The symlink is diagnostic, not gating.
        checks.all_deployed = checks.supervisor_running && checks.app_responding;
        checks
    }
}

impl Default for SshStateDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateProbe for SshStateDetector {
    async fn test_connection(&self, target: &Target) -> ConnectionTest {
        self.ssh
            .test_connection(&target.address, target.port, &target.user, &target.key_path)
            .await
    }

    async fn detect(&self, target: &Target) -> DetectionResult {
        let connection = self.test_connection(target).await;
        if !connection.success {
            return DetectionResult {
                state: ServerState::NotReady,
                message: format!("Offline - cannot connect via SSH: {}", connection.message),
                provisioning: ProvisioningChecks::default(),
                deployment: DeploymentChecks::default(),
            };
        }

        let provisioning = self.check_provisioning(target).await;
        let deployment = if provisioning.all_provisioned {
            self.check_deployment(target).await
        } else {
            DeploymentChecks::default()
        };

        let (state, message) = if deployment.all_deployed {
            (ServerState::Deployed, "Application deployed and running")
        } else if provisioning.all_provisioned {
            (
                ServerState::Provisioned,
                "Server provisioned, ready for deployment",
            )
        } else {
            (ServerState::Ready, "Server accessible but not provisioned")
        };

        DetectionResult {
            state,
            message: message.to_string(),
            provisioning,
            deployment,
        }
    }
}
