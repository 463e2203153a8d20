//! Short-lived SSH probes against managed targets
//!
//! Not a general SSH client: each probe drives the system `ssh` binary for a
//! single command with public-key auth. Host-key verification is deliberately
//! permissive for an operator-owned fleet; callers needing strict mode must
//! tighten it at the boundary.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::utils::expand_tilde;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a connectivity test
#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    pub latency: Duration,
}

/// Result of running one remote command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Transport-level success; a non-zero remote exit still lands here
    /// because diagnostic commands routinely exit non-zero.
    pub success: bool,
    /// The remote command's stdout.
    pub output: String,
    pub message: String,
}

struct RawOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Minimal SSH probe client
#[derive(Debug, Clone)]
pub struct SshProbe {
    command_timeout: Duration,
}

impl SshProbe {
    pub fn new() -> Self {
        Self {
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Handshake, run `echo OK`, verify the output.
    pub async fn test_connection(
        &self,
        address: &str,
        port: u16,
        user: &str,
        key_path: &str,
    ) -> ConnectionTest {
        let start = Instant::now();
        match self.run_ssh(address, port, user, key_path, "echo OK").await {
            Ok(raw) if raw.exit_code == 255 => ConnectionTest {
                success: false,
                message: connection_message(&raw.stderr),
                latency: start.elapsed(),
            },
            Ok(raw) if raw.exit_code == 0 && raw.stdout.trim() == "OK" => {
                let latency = start.elapsed();
                ConnectionTest {
                    success: true,
                    message: format!("Connected successfully ({}ms)", latency.as_millis()),
                    latency,
                }
            }
            Ok(_) => ConnectionTest {
                success: false,
                message: "Unexpected command output".to_string(),
                latency: start.elapsed(),
            },
            Err(message) => ConnectionTest {
                success: false,
                message,
                latency: start.elapsed(),
            },
        }
    }

    /// Run an arbitrary command; the caller decides what exit codes mean.
    pub async fn execute(
        &self,
        address: &str,
        port: u16,
        user: &str,
        key_path: &str,
        command: &str,
    ) -> CommandOutcome {
        match self.run_ssh(address, port, user, key_path, command).await {
            Ok(raw) if raw.exit_code == 255 => CommandOutcome {
                success: false,
                output: raw.stdout,
                message: connection_message(&raw.stderr),
            },
            Ok(raw) => CommandOutcome {
                success: true,
                output: raw.stdout,
                message: format!("exit code {}", raw.exit_code),
            },
            Err(message) => CommandOutcome {
                success: false,
                output: String::new(),
                message,
            },
        }
    }

    async fn run_ssh(
        &self,
        address: &str,
        port: u16,
        user: &str,
        key_path: &str,
        command: &str,
    ) -> Result<RawOutput, String> {
        let key = expand_tilde(key_path);
        let destination = format!("{user}@{address}");
        debug!("ssh probe to {destination}:{port}");

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", CONNECT_TIMEOUT.as_secs()))
            .arg("-p")
            .arg(port.to_string())
            .arg("-i")
            .arg(&key)
            .arg(&destination)
            .arg(command);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(format!("failed to launch ssh: {err}")),
            Err(_) => {
                return Err(format!(
                    "ssh command timed out after {}s",
                    self.command_timeout.as_secs()
                ))
            }
        };

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

impl Default for SshProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_message(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "ssh connection failed".to_string()
    } else {
        trimmed.to_string()
    }
}
