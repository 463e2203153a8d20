//! Control plane
//!
//! Accepts action requests, feeds them through the queue into a worker pool,
//! runs the per-action pipelines, and reports progress through callbacks.
//! Within one target, actions run in queue order; across targets in parallel
//! mode, no ordering is promised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::errors::ControllerError;
use crate::inventory::models::Target;
use crate::probe::detect::{SshStateDetector, StateProbe};
use crate::probe::health::{HealthCheck, HttpHealthProbe};
use crate::queue::{ActionQueue, QueuedAction};
use crate::runner::playbook::{Playbook, PlaybookRunner};
use crate::status::models::{ActionKind, ServerState};
use crate::status::store::StatusStore;
use crate::storage::layout::StateLayout;

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_BUFFER: usize = 100;

/// Invoked with `(target_name, message)` for every progress event
pub type ProgressCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Invoked with `(target_name, target_address)` at most once per deploy
pub type DeploySuccessCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct Control {
    running: bool,
    max_workers: usize,
}

/// The controller's control plane for one environment
pub struct Orchestrator {
    environment: String,
    status: Arc<StatusStore>,
    queue: Arc<ActionQueue>,
    runner: Arc<PlaybookRunner>,
    health: Arc<dyn HealthCheck>,
    detector: Arc<dyn StateProbe>,
    control: RwLock<Control>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    progress_cb: RwLock<Option<ProgressCallback>>,
    deploy_success_cb: RwLock<Option<DeploySuccessCallback>>,
    health_check_enabled: AtomicBool,
    skip_health_check: AtomicBool,
    active_workers: AtomicUsize,
    peak_workers: AtomicUsize,
}

impl Orchestrator {
    pub async fn new(
        layout: &StateLayout,
        environment: &str,
        status: Arc<StatusStore>,
    ) -> Result<Self, ControllerError> {
        let queue = Arc::new(ActionQueue::open(layout, environment).await?);
        let runner = Arc::new(PlaybookRunner::new(layout, environment));
        let health: Arc<dyn HealthCheck> = Arc::new(HttpHealthProbe::new()?);
        let detector: Arc<dyn StateProbe> = Arc::new(SshStateDetector::new());

        Ok(Self {
            environment: environment.to_string(),
            status,
            queue,
            runner,
            health,
            detector,
            control: RwLock::new(Control {
                running: false,
                max_workers: 0,
            }),
            stop_tx: Mutex::new(None),
            progress_cb: RwLock::new(None),
            deploy_success_cb: RwLock::new(None),
            health_check_enabled: AtomicBool::new(true),
            skip_health_check: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            peak_workers: AtomicUsize::new(0),
        })
    }

    /// Swap the engine runner (used by the test suite to stub the engine).
    pub fn with_runner(mut self, runner: PlaybookRunner) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn with_health_probe(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn with_state_probe(mut self, detector: Arc<dyn StateProbe>) -> Self {
        self.detector = detector;
        self
    }

    // ------------------------------ configuration ------------------------------

    pub async fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.progress_cb.write().await = Some(Arc::new(callback));
    }

    pub async fn set_deploy_success_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.deploy_success_cb.write().await = Some(Arc::new(callback));
    }

    pub fn set_health_check_enabled(&self, enabled: bool) {
        self.health_check_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Skip verification for the next deploy only; consumed on use.
    pub fn skip_next_health_check(&self) {
        self.skip_health_check.store(true, Ordering::SeqCst);
    }

    /// `0` = sequential; `N > 0` = worker pool of N.
    pub async fn set_max_workers(&self, workers: usize) {
        self.control.write().await.max_workers = workers;
        info!("max workers set to {workers} (0=sequential)");
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently active workers since start.
    pub fn peak_workers(&self) -> usize {
        self.peak_workers.load(Ordering::SeqCst)
    }

    // -------------------------------- queue intake ------------------------------

    pub async fn queue_provision(&self, names: &[String], priority: i32, tags: &str) {
        debug!("queueing provision for {} targets", names.len());
        for name in names {
            self.queue
                .add(name, ActionKind::Provision, priority, tags)
                .await;
        }
    }

    pub async fn queue_deploy(&self, names: &[String], priority: i32, tags: &str) {
        debug!("queueing deploy for {} targets", names.len());
        for name in names {
            self.queue.add(name, ActionKind::Deploy, priority, tags).await;
        }
    }

    pub async fn queue_check(&self, names: &[String], priority: i32) {
        debug!("queueing check for {} targets", names.len());
        for name in names {
            self.queue.add(name, ActionKind::Check, priority, "").await;
        }
    }

    pub async fn get_queue_size(&self) -> usize {
        self.queue.size().await
    }

    pub async fn get_queued_actions(&self) -> Vec<QueuedAction> {
        self.queue.get_all().await
    }

    pub async fn clear_queue(&self) {
        self.queue.clear().await;
    }

    /// Run readiness checks across the target set and persist the results.
    pub async fn validate_inventory(&self, targets: &[Target]) {
        self.status.validate_inventory(targets).await;
    }

    // ---------------------------------- lifecycle -------------------------------

    /// Start draining the queue against the given target set.
    pub async fn start(self: &Arc<Self>, targets: Vec<Target>) {
        {
            let mut control = self.control.write().await;
            if control.running {
                info!("orchestrator already running, skipping start");
                return;
            }
            control.running = true;
        }
        self.peak_workers.store(0, Ordering::SeqCst);

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().await = Some(stop_tx);

        info!("starting queue processing for environment {}", self.environment);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.process_queue(targets, stop_rx).await;
            this.control.write().await.running = false;
            debug!("queue processing stopped");
        });
    }

    /// Cancel in-flight actions and stop draining. Idempotent; does not wait
    /// for drain.
    pub async fn stop(&self) {
        let mut control = self.control.write().await;
        if !control.running {
            return;
        }
        info!("stopping: cancelling in-flight actions");
        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(true);
        }
        control.running = false;
    }

    pub async fn is_running(&self) -> bool {
        self.control.read().await.running
    }

    // ------------------------------- queue draining ------------------------------

    async fn process_queue(self: &Arc<Self>, targets: Vec<Target>, stop_rx: watch::Receiver<bool>) {
        let workers = self.control.read().await.max_workers;
        if workers == 0 {
            info!("running in sequential mode");
            self.process_sequential(targets, stop_rx).await;
        } else {
            info!("running in parallel mode with {workers} workers");
            self.process_parallel(targets, workers, stop_rx).await;
        }
    }

    async fn process_sequential(
        self: &Arc<Self>,
        targets: Vec<Target>,
        stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *stop_rx.borrow() {
                info!("sequential loop received stop signal");
                return;
            }

            let Some(action) = self.queue.next().await else {
                tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
                continue;
            };

            debug!("processing {} for {}", action.action, action.server_name);
            self.execute_action(&action, &targets, stop_rx.clone()).await;
            self.queue.complete().await;
        }
    }

    async fn process_parallel(
        self: &Arc<Self>,
        targets: Vec<Target>,
        workers: usize,
        stop_rx: watch::Receiver<bool>,
    ) {
        let (action_tx, action_rx) = mpsc::channel::<QueuedAction>(workers);
        let action_rx = Arc::new(Mutex::new(action_rx));
        let targets = Arc::new(targets);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let this = Arc::clone(self);
            let action_rx = Arc::clone(&action_rx);
            let targets = Arc::clone(&targets);
            let stop_rx = stop_rx.clone();

            handles.push(tokio::spawn(async move {
                debug!("worker {worker_id} started");
                loop {
                    let action = action_rx.lock().await.recv().await;
                    let Some(action) = action else { break };

                    let active = this.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
                    this.peak_workers.fetch_max(active, Ordering::SeqCst);
                    debug!(
                        "worker {worker_id} processing {} for {} (active {active})",
                        action.action, action.server_name
                    );

                    this.execute_action(&action, &targets, stop_rx.clone()).await;
                    this.active_workers.fetch_sub(1, Ordering::SeqCst);
                }
                debug!("worker {worker_id} stopped");
            }));
        }

        // Single producer: pop, remove by id so nothing re-dispatches the
        // item, then hand it to the pool.
        let mut producer_stop = stop_rx.clone();
        loop {
            if *producer_stop.borrow() {
                info!("parallel producer received stop signal");
                break;
            }

            let Some(action) = self.queue.next().await else {
                tokio::select! {
                    _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => {}
                    _ = producer_stop.changed() => {}
                }
                continue;
            };

            self.queue.complete_by_id(&action.id).await;
            if action_tx.send(action).await.is_err() {
                break;
            }
        }

        drop(action_tx);
        for handle in handles {
            if let Err(err) = handle.await {
                // A panicked worker reduces pool capacity; it is reported, not
                // replaced.
                error!("worker task failed: {err}");
            }
        }
    }

    // ------------------------------- action pipeline -----------------------------

    async fn execute_action(
        self: &Arc<Self>,
        action: &QueuedAction,
        targets: &[Target],
        stop_rx: watch::Receiver<bool>,
    ) {
        let Some(target) = targets.iter().find(|t| t.name == action.server_name) else {
            self.set_status(
                &action.server_name,
                ServerState::Failed,
                action.action,
                "Server not found",
            )
            .await;
            return;
        };

        // Fan progress events out to the single subscriber, tagged with the
        // target name.
        let (progress_tx, mut progress_rx) = mpsc::channel::<String>(PROGRESS_BUFFER);
        let fan_out = {
            let this = Arc::clone(self);
            let name = action.server_name.clone();
            tokio::spawn(async move {
                while let Some(message) = progress_rx.recv().await {
                    this.emit_progress(&name, &message).await;
                }
            })
        };

        match action.action {
            ActionKind::Provision => {
                self.run_provision(action, target, progress_tx, stop_rx).await
            }
            ActionKind::Deploy => self.run_deploy(action, target, progress_tx, stop_rx).await,
            ActionKind::Check => self.run_check(action, target).await,
            ActionKind::Validate => {
                let checks = StatusStore::validate_target(target);
                if let Err(err) = self.status.update_readiness(&target.name, checks).await {
                    warn!("could not persist readiness for {}: {err}", target.name);
                }
            }
        }

        let _ = fan_out.await;
    }

    async fn run_provision(
        &self,
        action: &QueuedAction,
        target: &Target,
        progress_tx: mpsc::Sender<String>,
        stop_rx: watch::Receiver<bool>,
    ) {
        self.set_status(
            &target.name,
            ServerState::Provisioning,
            action.action,
            "Provisioning server...",
        )
        .await;

        let result = self
            .runner
            .run(
                Playbook::Provision,
                &target.name,
                &action.tags,
                false,
                stop_rx,
                Some(progress_tx),
            )
            .await;

        match result {
            Ok(result) if result.success => {
                self.set_status(&target.name, ServerState::Provisioned, action.action, "")
                    .await;
            }
            Ok(result) => {
                self.set_status(
                    &target.name,
                    ServerState::Failed,
                    action.action,
                    &result.error_message,
                )
                .await;
            }
            Err(err) => {
                self.set_status(&target.name, ServerState::Failed, action.action, &err.to_string())
                    .await;
            }
        }
    }

    async fn run_deploy(
        &self,
        action: &QueuedAction,
        target: &Target,
        progress_tx: mpsc::Sender<String>,
        stop_rx: watch::Receiver<bool>,
    ) {
        let current = self.status.get(&target.name).await;
        if current.state != ServerState::Provisioned && current.state != ServerState::Deployed {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                "Server must be provisioned first",
            )
            .await;
            return;
        }

        self.set_status(
            &target.name,
            ServerState::Deploying,
            action.action,
            "Deploying application...",
        )
        .await;

        let result = match self
            .runner
            .run(
                Playbook::Deploy,
                &target.name,
                &action.tags,
                false,
                stop_rx,
                Some(progress_tx),
            )
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.set_status(&target.name, ServerState::Failed, action.action, &err.to_string())
                    .await;
                return;
            }
        };

        if !result.success {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                &result.error_message,
            )
            .await;
            return;
        }

        let skip = self.skip_health_check.swap(false, Ordering::SeqCst);
        let perform = self.health_check_enabled.load(Ordering::SeqCst) && !skip;

        if !perform {
            debug!("health check skipped (disabled or skip requested)");
            self.set_status(&target.name, ServerState::Deployed, action.action, "")
                .await;
            self.emit_deploy_success(&target.name, &target.address).await;
            return;
        }

        self.set_status(&target.name, ServerState::Verifying, action.action, "Checking...")
            .await;

        let tunneled = target.address == "127.0.0.1"
            && target.port > 0
            && !target.key_path.is_empty()
            && target.app_port > 0;

        let verified = if tunneled {
            self.health.check_tunneled(target, target.app_port).await
        } else {
            let first_port = if target.http_port > 0 { target.http_port } else { 80 };
            let mut ports = vec![first_port];
            if target.app_port > 0 && target.app_port != first_port {
                ports.push(target.app_port);
            }

            let mut outcome = Err(ControllerError::HealthCheck("no ports to probe".to_string()));
            for port in ports {
                info!("trying health check on {}:{port}", target.address);
                outcome = self.health.check_direct(&target.address, port).await;
                if outcome.is_ok() {
                    break;
                }
            }
            outcome
        };

        match verified {
            Ok(()) => {
                self.set_status(&target.name, ServerState::Deployed, action.action, "")
                    .await;
                self.emit_deploy_success(&target.name, &target.address).await;
            }
            Err(err) => {
                let message = format!("Health check failed: {err}");
                warn!("{message}");
                self.set_status(&target.name, ServerState::Failed, action.action, &message)
                    .await;
                // The callback still fires: the app may be reachable through
                // paths the controller's probe cannot see.
                self.emit_deploy_success(&target.name, &target.address).await;
            }
        }
    }

    async fn run_check(&self, action: &QueuedAction, target: &Target) {
        self.set_status(
            &target.name,
            ServerState::Verifying,
            action.action,
            "Validating configuration...",
        )
        .await;

        let checks = StatusStore::validate_target(target);
        if !checks.fields_complete {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                "Configuration incomplete: missing required fields",
            )
            .await;
            return;
        }
        if !checks.address_valid {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                "Invalid address format",
            )
            .await;
            return;
        }
        if !checks.port_valid {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                "Invalid SSH port (must be 1-65535)",
            )
            .await;
            return;
        }
        if !checks.key_file_present {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                &format!("SSH key not found at: {}", target.key_path),
            )
            .await;
            return;
        }

        self.set_status(
            &target.name,
            ServerState::Verifying,
            action.action,
            "Testing SSH connection...",
        )
        .await;

        let connection = self.detector.test_connection(target).await;
        if !connection.success {
            self.set_status(
                &target.name,
                ServerState::Failed,
                action.action,
                &format!("SSH connection failed: {}", connection.message),
            )
            .await;
            return;
        }

        self.set_status(
            &target.name,
            ServerState::Verifying,
            action.action,
            "Detecting server state...",
        )
        .await;

        let detection = self.detector.detect(target).await;
        info!(
            "state detected for {}: {} - {}",
            target.name, detection.state, detection.message
        );

        self.set_status(&target.name, detection.state, action.action, &detection.message)
            .await;
    }

    // ---------------------------------- callbacks --------------------------------

    async fn set_status(&self, name: &str, state: ServerState, action: ActionKind, message: &str) {
        if let Err(err) = self.status.update(name, state, action, message).await {
            warn!("could not persist status for {name}: {err}");
        }
    }

    async fn emit_progress(&self, name: &str, message: &str) {
        let callback = self.progress_cb.read().await.clone();
        if let Some(callback) = callback {
            callback(name, message);
        }
    }

    async fn emit_deploy_success(&self, name: &str, address: &str) {
        let callback = self.deploy_success_cb.read().await.clone();
        if let Some(callback) = callback {
            callback(name, address);
        }
    }
}
