//! Workflow worker: claims durable runs and drives them through handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use atrium_core::{defaults, Result, WorkflowKind, WorkflowRepository, WorkflowRun, WorkflowStats};

use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};

/// Configuration for the workflow worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of runs executed concurrently.
    pub max_concurrent: usize,
    /// Whether to process runs at all.
    pub enabled: bool,
    /// Upper bound on one execution of a run.
    pub run_timeout_secs: u64,
    /// Runs left `running` this long are requeued at startup.
    pub stale_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKFLOW_POLL_INTERVAL_MS,
            max_concurrent: defaults::WORKFLOW_MAX_CONCURRENT,
            enabled: true,
            run_timeout_secs: defaults::WORKFLOW_TIMEOUT_SECS,
            stale_after_secs: defaults::WORKFLOW_STALE_AFTER_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKFLOW_WORKER_ENABLED` | `true` | Enable/disable run processing |
    /// | `WORKFLOW_MAX_CONCURRENT` | `8` | Max concurrent runs |
    /// | `WORKFLOW_POLL_INTERVAL_MS` | `500` | Polling interval when the queue is empty |
    /// | `WORKFLOW_TIMEOUT_SECS` | `900` | Per-run execution ceiling |
    /// | `WORKFLOW_STALE_AFTER_SECS` | `1800` | Age at which abandoned runs are requeued |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKFLOW_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKFLOW_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKFLOW_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKFLOW_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKFLOW_POLL_INTERVAL_MS);

        let run_timeout_secs = std::env::var("WORKFLOW_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKFLOW_TIMEOUT_SECS);

        let stale_after_secs = std::env::var("WORKFLOW_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKFLOW_STALE_AFTER_SECS);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
            run_timeout_secs,
            stale_after_secs,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_run_timeout(mut self, secs: u64) -> Self {
        self.run_timeout_secs = secs;
        self
    }
}

/// Event emitted by the workflow worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    RunStarted {
        run_id: Uuid,
        kind: WorkflowKind,
    },
    RunCompleted {
        run_id: Uuid,
        kind: WorkflowKind,
    },
    RunFailed {
        run_id: Uuid,
        kind: WorkflowKind,
        error: String,
        /// The run went back to the queue.
        will_retry: bool,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to stop claiming; in-flight runs still finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| atrium_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<WorkflowKind, Arc<dyn WorkflowHandler>>>>;

/// Worker that executes queued workflow runs.
pub struct WorkflowWorker {
    repository: Arc<dyn WorkflowRepository>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    wakeup: Option<Arc<Notify>>,
}

impl WorkflowWorker {
    pub fn new(repository: Arc<dyn WorkflowRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        Self {
            repository,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            wakeup: None,
        }
    }

    /// Wake the idle loop early when this is notified (new run enqueued).
    pub fn with_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub async fn register_handler(&self, handler: Arc<dyn WorkflowHandler>) {
        let kind = handler.kind();
        self.handlers.write().await.insert(kind, handler);
        debug!(workflow_kind = kind.as_str(), "Registered workflow handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claims a run whenever one of `max_concurrent` slots is free, so a
    /// long run never holds back the others. Sleeps only when the queue is
    /// empty. In-flight runs finish before the worker stops.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Workflow worker is disabled, not starting");
            return;
        }

        let stale_after = Duration::from_secs(self.config.stale_after_secs);
        match self.repository.requeue_stale(stale_after).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Requeued abandoned workflow runs"),
            Err(e) => warn!(error = %e, "Failed to requeue abandoned workflow runs"),
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Workflow worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = ?e, "Workflow task panicked");
                }
            }

            let slot = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Workflow worker received shutdown signal");
                    break;
                }
                slot = slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            if let Some(run) = self.claim_run().await {
                let worker = self.clone_refs();
                tasks.spawn(async move {
                    let _slot = slot;
                    worker.execute_run(run).await;
                });
                debug!(in_flight = tasks.len(), "Workflow run dispatched");
                continue;
            }
            drop(slot);

            let wakeup = self.wakeup.clone();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Workflow worker received shutdown signal");
                    break;
                }
                _ = sleep(poll_interval) => {}
                _ = async {
                    match wakeup {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Workflow task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Workflow worker stopped");
    }

    /// Execute queued runs one at a time until none can be claimed.
    /// Returns how many executions happened.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut executed = 0;
        loop {
            let kinds = self.handled_kinds().await;
            let Some(run) = self.repository.claim_next(&kinds).await? else {
                return Ok(executed);
            };
            self.clone_refs().execute_run(run).await;
            executed += 1;
        }
    }

    async fn handled_kinds(&self) -> Vec<WorkflowKind> {
        self.handlers.read().await.keys().copied().collect()
    }

    async fn claim_run(&self) -> Option<WorkflowRun> {
        let kinds = self.handled_kinds().await;
        match self.repository.claim_next(&kinds).await {
            Ok(run) => run,
            Err(e) => {
                error!(error = ?e, "Failed to claim workflow run");
                None
            }
        }
    }

    fn clone_refs(&self) -> WorkerRef {
        WorkerRef {
            repository: self.repository.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            run_timeout: Duration::from_secs(self.config.run_timeout_secs),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn stats(&self) -> Result<WorkflowStats> {
        self.repository.stats().await
    }
}

/// Reference bundle for executing one run in a spawned task.
struct WorkerRef {
    repository: Arc<dyn WorkflowRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    run_timeout: Duration,
}

impl WorkerRef {
    async fn execute_run(self, run: WorkflowRun) {
        let start = Instant::now();
        let run_id = run.id;
        let kind = run.kind;
        let can_retry = run.attempts < run.max_attempts;

        info!(
            subsystem = "jobs",
            component = "worker",
            workflow_id = %run_id,
            workflow_kind = kind.as_str(),
            attempt = run.attempts,
            "Executing workflow run"
        );
        let _ = self.event_tx.send(WorkerEvent::RunStarted { run_id, kind });

        let handler = self.handlers.read().await.get(&kind).cloned();

        let outcome = match handler {
            Some(handler) => {
                let mut ctx = WorkflowContext::new(run, self.repository.clone());
                match tokio::time::timeout(self.run_timeout, handler.execute(&mut ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            workflow_id = %run_id,
                            workflow_kind = kind.as_str(),
                            "Workflow run exceeded timeout of {}s",
                            self.run_timeout.as_secs()
                        );
                        WorkflowOutcome::Failed(format!(
                            "run exceeded timeout of {}s",
                            self.run_timeout.as_secs()
                        ))
                    }
                }
            }
            None => {
                warn!(workflow_kind = kind.as_str(), "No handler registered for workflow kind");
                WorkflowOutcome::Failed(format!("no handler for workflow kind: {}", kind))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            WorkflowOutcome::Completed => {
                if let Err(e) = self.repository.complete(run_id).await {
                    error!(error = ?e, workflow_id = %run_id, "Failed to mark run completed");
                    return;
                }
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    workflow_id = %run_id,
                    workflow_kind = kind.as_str(),
                    duration_ms,
                    "Workflow run completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::RunCompleted { run_id, kind });
            }
            WorkflowOutcome::Failed(error) => {
                self.record_failure(run_id, kind, error, false, duration_ms)
                    .await
            }
            WorkflowOutcome::Retry(error) => {
                self.record_failure(run_id, kind, error, can_retry, duration_ms)
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        run_id: Uuid,
        kind: WorkflowKind,
        error: String,
        will_retry: bool,
        duration_ms: u64,
    ) {
        if let Err(e) = self.repository.fail(run_id, &error, will_retry).await {
            error!(error = ?e, workflow_id = %run_id, "Failed to mark run failed");
            return;
        }
        warn!(
            subsystem = "jobs",
            component = "worker",
            workflow_id = %run_id,
            workflow_kind = kind.as_str(),
            %error,
            will_retry,
            duration_ms,
            "Workflow run failed"
        );
        let _ = self.event_tx.send(WorkerEvent::RunFailed {
            run_id,
            kind,
            error,
            will_retry,
        });
    }
}

/// Builder for creating a workflow worker with handlers.
pub struct WorkerBuilder {
    repository: Arc<dyn WorkflowRepository>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn WorkflowHandler>>,
    wakeup: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            repository,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            wakeup: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn WorkflowHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn WorkflowHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn with_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub async fn build(self) -> WorkflowWorker {
        let mut worker = WorkflowWorker::new(self.repository, self.config);
        if let Some(wakeup) = self.wakeup {
            worker = worker.with_wakeup(wakeup);
        }
        for handler in self.handlers {
            worker.register_handler(handler).await;
        }
        worker
    }
}
