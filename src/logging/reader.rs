//! Reads back per-invocation engine logs for post-mortem inspection

use std::path::{Path, PathBuf};

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::storage::layout::StateLayout;

/// Lists and tails an environment's engine logs
#[derive(Debug, Clone)]
pub struct LogReader {
    log_dir: Dir,
}

impl LogReader {
    pub fn new(layout: &StateLayout, environment: &str) -> Self {
        Self {
            log_dir: layout.logs_dir(environment),
        }
    }

    /// All log files for one target, oldest first. Log names embed a sortable
    /// timestamp, so lexical order is chronological order.
    pub async fn target_logs(&self, target: &str) -> Result<Vec<PathBuf>, ControllerError> {
        if !self.log_dir.exists().await {
            return Ok(Vec::new());
        }

        let prefix = format!("{target}_");
        let mut files: Vec<PathBuf> = self
            .log_dir
            .list_files()
            .await?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(&prefix) && name.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();

        files.sort();
        Ok(files)
    }

    /// The most recent log file for one target, if any.
    pub async fn latest_log(&self, target: &str) -> Result<Option<PathBuf>, ControllerError> {
        let mut files = self.target_logs(target).await?;
        Ok(files.pop())
    }

    /// The last `max_lines` lines of a log file.
    pub async fn tail(&self, log_file: &Path, max_lines: usize) -> Result<Vec<String>, ControllerError> {
        let contents = tokio::fs::read_to_string(log_file).await?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();

        if max_lines > 0 && lines.len() > max_lines {
            Ok(lines[lines.len() - max_lines..].to_vec())
        } else {
            Ok(lines)
        }
    }
}
