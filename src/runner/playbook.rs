//! Runs one CM-engine invocation against one target
//!
//! The child's stdout and stderr are drained by separate tasks into a shared
//! log file while a third wait point selects over child exit, cancellation,
//! and the ambient deadline. Folding these together risks deadlock when the
//! child writes faster than the parser consumes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::runner::progress;
use crate::storage::layout::StateLayout;

const DEFAULT_ENGINE_BIN: &str = "ansible-playbook";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The two playbooks the controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playbook {
    Provision,
    Deploy,
}

impl Playbook {
    pub fn file_name(&self) -> &'static str {
        match self {
            Playbook::Provision => "provision.yml",
            Playbook::Deploy => "deploy.yml",
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            Playbook::Provision => "provision",
            Playbook::Deploy => "deploy",
        }
    }
}

/// Outcome of one engine invocation
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    /// True when the run was terminated by stop or deadline rather than the
    /// engine exiting on its own.
    pub cancelled: bool,
    pub error_message: String,
    pub log_file: PathBuf,
}

/// Spawns and supervises CM-engine subprocesses for one environment
#[derive(Debug, Clone)]
pub struct PlaybookRunner {
    engine_bin: String,
    inventory_file: PathBuf,
    playbook_dir: PathBuf,
    log_dir: PathBuf,
    timeout: Duration,
}

impl PlaybookRunner {
    pub fn new(layout: &StateLayout, environment: &str) -> Self {
        Self {
            engine_bin: DEFAULT_ENGINE_BIN.to_string(),
            inventory_file: layout.hosts_file(environment).path().to_path_buf(),
            playbook_dir: PathBuf::from("playbooks"),
            log_dir: layout.logs_dir(environment).path().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the engine binary (also the seam the test suite stubs).
    pub fn with_engine_bin(mut self, bin: impl Into<String>) -> Self {
        self.engine_bin = bin.into();
        self
    }

    pub fn with_playbook_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.playbook_dir = dir.into();
        self
    }

    /// Override the ambient deadline (defaults to 30 minutes).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one playbook against one target.
    ///
    /// Progress events stream into `progress` as the engine emits them;
    /// `cancel` terminates the child when it flips to true. Setup failures
    /// (log file, spawn) return `Err`; engine failures, cancellation, and
    /// timeout all return a populated [`ExecutionResult`].
    pub async fn run(
        &self,
        playbook: Playbook,
        target: &str,
        tags: &str,
        check_mode: bool,
        mut cancel: watch::Receiver<bool>,
        progress: Option<mpsc::Sender<String>>,
    ) -> Result<ExecutionResult, ControllerError> {
        let action = playbook.action_name();
        let suffix = if check_mode { "_check" } else { "" };
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let log_path = self
            .log_dir
            .join(format!("{target}_{action}{suffix}_{timestamp}.log"));

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_file = tokio::fs::File::create(&log_path)
            .await
            .map_err(|e| ControllerError::Subprocess(format!("failed to create log file: {e}")))?;
        let log_file = Arc::new(Mutex::new(log_file));

        if let Some(tx) = &progress {
            let mode = if check_mode { " (dry-run)" } else { "" };
            let message = if tags.is_empty() {
                format!("Starting {action} playbook{mode}...")
            } else {
                format!("Starting {action} playbook with tags: {tags}{mode}...")
            };
            let _ = tx.send(message).await;
        }

        let mut cmd = Command::new(&self.engine_bin);
        cmd.arg("-i")
            .arg(&self.inventory_file)
            .arg(self.playbook_dir.join(playbook.file_name()))
            .arg("--limit")
            .arg(target);
        if !tags.is_empty() {
            cmd.arg("--tags").arg(tags);
        }
        if check_mode {
            cmd.arg("--check").arg("--diff");
        }
        cmd.env("ANSIBLE_FORCE_COLOR", "false");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("spawning {} for {target} ({action})", self.engine_bin);
        let mut child = cmd.spawn().map_err(|e| {
            ControllerError::Subprocess(format!("failed to start {}: {e}", self.engine_bin))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ControllerError::Subprocess("failed to capture engine stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ControllerError::Subprocess("failed to capture engine stderr".to_string())
        })?;

        // stdout feeds both the log and the progress parser; stderr is
        // log-only.
        let stdout_task = tokio::spawn(stream_lines(stdout, log_file.clone(), progress.clone()));
        let stderr_task = tokio::spawn(stream_lines(stderr, log_file.clone(), None));

        enum Waited {
            Exited(std::io::Result<std::process::ExitStatus>),
            Stopped,
            Deadline,
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancelled(&mut cancel) => Waited::Stopped,
            _ = &mut deadline => Waited::Deadline,
        };

        let outcome = match waited {
            Waited::Exited(status) => status.map_err(|e| {
                ControllerError::Subprocess(format!("failed to wait on engine: {e}"))
            })?,
            Waited::Stopped => {
                warn!("cancellation received, terminating engine for {target}");
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let message = format!("{action} cancelled by operator");
                if let Some(tx) = &progress {
                    let _ = tx.send(message.clone()).await;
                }
                return Ok(ExecutionResult {
                    success: false,
                    cancelled: true,
                    error_message: message,
                    log_file: log_path,
                });
            }
            Waited::Deadline => {
                warn!("deadline reached, terminating engine for {target}");
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let message = format!("{action} timed out after {:?}", self.timeout);
                if let Some(tx) = &progress {
                    let _ = tx.send(message.clone()).await;
                }
                return Ok(ExecutionResult {
                    success: false,
                    cancelled: true,
                    error_message: message,
                    log_file: log_path,
                });
            }
        };

        // Pipes are closed once the child is gone; drain the readers fully.
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if outcome.success() {
            if let Some(tx) = &progress {
                let _ = tx.send(format!("{action} completed successfully")).await;
            }
            Ok(ExecutionResult {
                success: true,
                cancelled: false,
                error_message: String::new(),
                log_file: log_path,
            })
        } else {
            let message = format!("engine exited with {outcome}");
            if let Some(tx) = &progress {
                let _ = tx.send(format!("{action} failed: {message}")).await;
            }
            Ok(ExecutionResult {
                success: false,
                cancelled: false,
                error_message: message,
                log_file: log_path,
            })
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Resolves when the cancellation flag flips to true. Parks forever if the
/// sender is gone without a stop, letting the other wait points win.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Copy one output stream line by line into the log, feeding stdout lines to
/// the progress classifier.
async fn stream_lines<R>(
    reader: R,
    log_file: Arc<Mutex<tokio::fs::File>>,
    progress: Option<mpsc::Sender<String>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut file = log_file.lock().await;
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
        if let Some(tx) = &progress {
            if let Some(event) = progress::parse_line(&line) {
                let _ = tx.send(event).await;
            }
        }
    }
}
