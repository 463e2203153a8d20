//! Post-deploy reachability checks

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::errors::ControllerError;
use crate::inventory::models::Target;
use crate::probe::ssh::SshProbe;

const MAX_ATTEMPTS: usize = 5;
const RETRY_DELAYS: [Duration; MAX_ATTEMPTS] = [
    Duration::from_secs(2),
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(8),
    Duration::from_secs(10),
];

/// Confirms a deployed application is reachable
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Direct HTTP reachability from the controller to the target.
    async fn check_direct(&self, address: &str, port: u16) -> Result<(), ControllerError>;

    /// Reachability probed from the target itself, for applications that
    /// listen only on loopback.
    async fn check_tunneled(&self, target: &Target, app_port: u16) -> Result<(), ControllerError>;
}

/// HTTP health probe with a curl fallback and an SSH-tunneled mode
pub struct HttpHealthProbe {
    client: Client,
    ssh: SshProbe,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            ssh: SshProbe::new(),
        })
    }

    async fn attempt_direct(&self, url: &str) -> Result<(), String> {
        let native_error = match self.client.get(url).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                // Any status below 500 means the application answered.
                if (200..500).contains(&code) {
                    return Ok(());
                }
                format!("bad HTTP status: {code}")
            }
            Err(err) => format!("HTTP GET failed: {err}"),
        };

        match curl_probe(url).await {
            Ok(()) => Ok(()),
            Err(curl_error) => Err(format!("{native_error}; curl: {curl_error}")),
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthProbe {
    async fn check_direct(&self, address: &str, port: u16) -> Result<(), ControllerError> {
        let url = format!("http://{address}:{port}/");
        info!("health check starting for {url}");

        let mut last_error = String::new();
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match self.attempt_direct(&url).await {
                Ok(()) => {
                    info!("health check passed on attempt {}", attempt + 1);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "health check attempt {}/{} failed: {err}",
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    last_error = err;
                }
            }

            if attempt == 0 {
                // One-shot TCP diagnostic, informational only.
                if port_open(address, port).await {
                    debug!("port {port} is open, but the HTTP request failed");
                } else {
                    debug!("port {port} appears closed or unreachable");
                }
            }

            tokio::time::sleep(*delay).await;
        }

        Err(ControllerError::HealthCheck(format!(
            "failed after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn check_tunneled(&self, target: &Target, app_port: u16) -> Result<(), ControllerError> {
        info!(
            "tunneled health check via {}:{} for localhost:{app_port}",
            target.address, target.port
        );
        let command = format!(
            "curl -sf -m 5 http://localhost:{app_port}/ > /dev/null 2>&1 && echo OK || echo FAIL"
        );

        let mut last_message = String::new();
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            let outcome = self
                .ssh
                .execute(
                    &target.address,
                    target.port,
                    &target.user,
                    &target.key_path,
                    &command,
                )
                .await;

            if outcome.success && outcome.output.trim() == "OK" {
                info!("tunneled health check passed on attempt {}", attempt + 1);
                return Ok(());
            }

            warn!(
                "tunneled health check attempt {}/{} failed: {}",
                attempt + 1,
                MAX_ATTEMPTS,
                outcome.message
            );
            last_message = outcome.message;
            tokio::time::sleep(*delay).await;
        }

        Err(ControllerError::HealthCheck(format!(
            "remote check failed after {MAX_ATTEMPTS} attempts: {last_message}"
        )))
    }
}

async fn curl_probe(url: &str) -> Result<(), String> {
    let mut cmd = tokio::process::Command::new("curl");
    cmd.arg("-sf")
        .arg("-m")
        .arg("10")
        .arg("--connect-timeout")
        .arg("5")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    match cmd.status().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("curl exited with {status}")),
        Err(err) => Err(format!("curl unavailable: {err}")),
    }
}

async fn port_open(address: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_secs(3), TcpStream::connect((address, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_budget() {
        assert_eq!(RETRY_DELAYS.len(), 5);
        let total: Duration = RETRY_DELAYS.iter().sum();
        assert_eq!(total, Duration::from_secs(28));
    }
}
