//! Playbook runner tests, driving a stubbed engine binary
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flotilla::runner::playbook::{Playbook, PlaybookRunner};
use flotilla::storage::layout::StateLayout;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

fn write_engine_stub(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn runner_with_stub(layout: &StateLayout, stub: &Path) -> PlaybookRunner {
    PlaybookRunner::new(layout, "test").with_engine_bin(stub.display().to_string())
}

async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_successful_run_streams_progress_and_log() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let stub = write_engine_stub(
        dir.path(),
        r#"echo "PLAY [Provision web servers] ****"
echo "TASK [Gathering Facts] ****"
echo "ok: [alpha]"
echo "changed: [alpha]"
echo "engine diagnostics" >&2
exit 0"#,
    );

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let (progress_tx, progress_rx) = mpsc::channel(100);

    let result = runner_with_stub(&layout, &stub)
        .run(Playbook::Provision, "alpha", "", false, cancel_rx, Some(progress_tx))
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.cancelled);
    assert!(result.error_message.is_empty());

    // Log holds the combined output verbatim, stderr included.
    let log = tokio::fs::read_to_string(&result.log_file).await.unwrap();
    assert!(log.contains("PLAY [Provision web servers]"));
    assert!(log.contains("ok: [alpha]"));
    assert!(log.contains("engine diagnostics"));

    let events = drain(progress_rx).await;
    assert!(events.contains(&"Starting provision playbook...".to_string()));
    assert!(events.contains(&"Starting: Provision web servers".to_string()));
    assert!(events.contains(&"Collecting server information".to_string()));
    assert!(events.contains(&"Modified on alpha".to_string()));
    assert!(events.contains(&"provision completed successfully".to_string()));
    // The ok: line is suppressed.
    assert!(!events.iter().any(|e| e.contains("ok:")));
}

#[tokio::test]
async fn test_argument_vector_and_check_mode() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let stub = write_engine_stub(dir.path(), r#"echo "ARGS: $@""#);

    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let result = runner_with_stub(&layout, &stub)
        .run(Playbook::Deploy, "alpha", "code,health", true, cancel_rx, None)
        .await
        .unwrap();

    assert!(result.success);
    let name = result.log_file.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("alpha_deploy_check_"));

    let log = tokio::fs::read_to_string(&result.log_file).await.unwrap();
    assert!(log.contains("-i"));
    assert!(log.contains("hosts.yml"));
    assert!(log.contains("deploy.yml"));
    assert!(log.contains("--limit alpha"));
    assert!(log.contains("--tags code,health"));
    assert!(log.contains("--check --diff"));
}

#[tokio::test]
async fn test_engine_failure_is_a_result_not_an_error() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let stub = write_engine_stub(dir.path(), "echo \"fatal: [alpha]: FAILED! => boom\"\nexit 2");

    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let result = runner_with_stub(&layout, &stub)
        .run(Playbook::Provision, "alpha", "", false, cancel_rx, None)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(!result.cancelled);
    assert!(result.error_message.contains("exited"));
    assert!(result.log_file.exists());
}

#[tokio::test]
async fn test_missing_engine_binary_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let runner =
        PlaybookRunner::new(&layout, "test").with_engine_bin("/no/such/engine/binary");

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = runner
        .run(Playbook::Provision, "alpha", "", false, cancel_rx, None)
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancellation_terminates_the_child() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let stub = write_engine_stub(dir.path(), "exec sleep 60");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let runner = runner_with_stub(&layout, &stub);

    let handle = tokio::spawn(async move {
        runner
            .run(Playbook::Provision, "alpha", "", false, cancel_rx, None)
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    cancel_tx.send(true).unwrap();

    let result = handle.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.cancelled);
    assert!(result.error_message.contains("cancelled"));
}

#[tokio::test]
async fn test_deadline_terminates_the_child() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let stub = write_engine_stub(dir.path(), "exec sleep 60");

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let started = Instant::now();

    let result = runner_with_stub(&layout, &stub)
        .with_timeout(Duration::from_millis(300))
        .run(Playbook::Provision, "alpha", "", false, cancel_rx, None)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.cancelled);
    assert!(result.error_message.contains("timed out"));
}
