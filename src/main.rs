//! Flotilla - Entry Point
//!
//! Headless driver for the fleet-deployment controller: loads an environment,
//! validates its inventory, queues the requested actions, and drains the
//! queue until done or interrupted.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use flotilla::config::ConfigOptions;
use flotilla::inventory::loader::load_environment;
use flotilla::inventory::models::{Environment, Target};
use flotilla::logging::reader::LogReader;
use flotilla::logs::{init_logging, LogOptions};
use flotilla::orchestrator::Orchestrator;
use flotilla::status::models::ServerState;
use flotilla::status::store::StatusStore;
use flotilla::storage::layout::StateLayout;
use flotilla::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version_info()).unwrap());
        return;
    }

    let Some(environment_name) = cli_args.get("env").cloned() else {
        eprintln!("Usage: flotilla --env=<name> [--state-root=<dir>] [--log-level=<level>]");
        eprintln!("                [--provision=<targets>] [--deploy=<targets>] [--check=<targets>]");
        eprintln!("       target lists are comma-separated names, or 'all'");
        return;
    };

    let layout = StateLayout::new(cli_args.get("state-root").map(String::as_str).unwrap_or("."));

    let (options, options_error) = match ConfigOptions::load(&layout).await {
        Ok(options) => (options, None),
        Err(e) => (ConfigOptions::default(), Some(e)),
    };

    // Initialize logging; the command line overrides the options file.
    let log_options = LogOptions {
        log_level: cli_args
            .get("log-level")
            .and_then(|level| level.parse().ok())
            .unwrap_or_else(|| options.log_level.clone()),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }
    if let Some(e) = options_error {
        warn!("Unable to read options file, using defaults: {e}");
    }

    let environment = match load_environment(&layout, &environment_name).await {
        Ok(environment) => environment,
        Err(e) => {
            error!("Unable to load environment {environment_name}: {e}");
            return;
        }
    };

    if let Err(e) = run(&layout, environment, options, cli_args).await {
        error!("Controller failed: {e}");
    }
}

async fn run(
    layout: &StateLayout,
    environment: Environment,
    options: ConfigOptions,
    cli_args: HashMap<String, String>,
) -> Result<(), flotilla::errors::ControllerError> {
    info!(
        "controlling environment {} ({} targets)",
        environment.name,
        environment.targets.len()
    );

    let status = Arc::new(StatusStore::open(layout, &environment.name).await?);
    let orchestrator = Arc::new(Orchestrator::new(layout, &environment.name, status.clone()).await?);

    orchestrator.set_health_check_enabled(options.health_check_enabled);
    orchestrator.set_max_workers(options.max_workers).await;
    orchestrator
        .set_progress_callback(|name, message| info!("[{name}] {message}"))
        .await;
    orchestrator
        .set_deploy_success_callback(|name, address| {
            info!("[{name}] deployed; application at http://{address}/")
        })
        .await;

    orchestrator.validate_inventory(&environment.targets).await;

    if let Some(names) = resolve_targets(&cli_args, "provision", &environment.targets) {
        orchestrator
            .queue_provision(&names, 0, &options.provision_tag_filter())
            .await;
    }
    if let Some(names) = resolve_targets(&cli_args, "deploy", &environment.targets) {
        orchestrator
            .queue_deploy(&names, 0, &options.deploy_tag_filter())
            .await;
    }
    if let Some(names) = resolve_targets(&cli_args, "check", &environment.targets) {
        orchestrator.queue_check(&names, 0).await;
    }

    if orchestrator.get_queue_size().await == 0 {
        info!("nothing queued; readiness results:");
        for (name, record) in status.all().await {
            info!("  {name}: {}", record.state);
        }
        return Ok(());
    }

    orchestrator.start(environment.targets.clone()).await;

    tokio::select! {
        _ = await_shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
        }
        _ = await_drain(&orchestrator) => {
            info!("Queue drained");
        }
    }
    orchestrator.stop().await;

    report_failures(layout, &environment, &status, options.log_retention_lines).await;
    Ok(())
}

/// Resolve a comma-separated target list flag; `all` expands to every target.
fn resolve_targets(
    cli_args: &HashMap<String, String>,
    flag: &str,
    targets: &[Target],
) -> Option<Vec<String>> {
    let value = cli_args.get(flag)?;
    if value == "all" || value == "true" {
        return Some(targets.iter().map(|t| t.name.clone()).collect());
    }
    Some(value.split(',').map(|name| name.trim().to_string()).collect())
}

async fn await_drain(orchestrator: &Arc<Orchestrator>) {
    let idle = |orchestrator: &Arc<Orchestrator>| {
        let orchestrator = Arc::clone(orchestrator);
        async move {
            orchestrator.get_queue_size().await == 0 && orchestrator.active_workers() == 0
        }
    };

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if !idle(orchestrator).await {
            continue;
        }
        // Items can sit briefly between the queue and a worker; only two
        // consecutive idle observations count as drained.
        tokio::time::sleep(Duration::from_millis(500)).await;
        if idle(orchestrator).await {
            return;
        }
    }
}

/// Show the tail of the latest engine log for every failed target.
async fn report_failures(
    layout: &StateLayout,
    environment: &Environment,
    status: &Arc<StatusStore>,
    log_lines: usize,
) {
    let reader = LogReader::new(layout, &environment.name);

    for (name, record) in status.all().await {
        if record.state != ServerState::Failed {
            continue;
        }
        error!("{name} failed: {}", record.error_message);

        match reader.latest_log(&name).await {
            Ok(Some(log_file)) => {
                info!("last lines of {}:", log_file.display());
                if let Ok(lines) = reader.tail(&log_file, log_lines).await {
                    for line in lines {
                        info!("  {line}");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("could not read logs for {name}: {e}"),
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
