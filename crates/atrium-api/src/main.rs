//! atrium-api server binary.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atrium_api::config::{EntityStoreKind, ObjectStoreKind};
use atrium_api::{router, ApiConfig, AppDeps, AppState};
use atrium_core::{
    defaults, EntityRegistry, EntityStore, NotificationHub, ObjectStore, WorkflowRepository,
};
use atrium_db::{
    log_pool_metrics, Database, FilesystemObjectStore, MemoryDocumentStore, MemoryObjectStore,
    MemoryWorkflowRepository, PoolConfig, UrlSigner,
};
use atrium_jobs::{
    LoggingInvitationDelivery, OrchestratorConfig, WorkerBuilder, WorkerConfig, WorkerEvent,
};
use atrium_kb::QnaMakerClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "atrium_api=debug,atrium_jobs=debug,atrium_db=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("atrium-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ApiConfig::from_env();

    // Entity documents and workflow runs
    let registry = Arc::new(EntityRegistry::from_env());
    let (entities, workflows, wakeup): (EntityStore, Arc<dyn WorkflowRepository>, Arc<Notify>) =
        match config.entity_store {
            EntityStoreKind::Postgres => {
                info!("Connecting to database...");
                let db =
                    Database::connect_with_config(&config.database_url, PoolConfig::from_env())
                        .await?;
                info!("Database connected");

                info!("Running database migrations...");
                db.migrate().await?;
                info!("Database migrations complete");

                let pool = db.pool().clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(60));
                    loop {
                        interval.tick().await;
                        log_pool_metrics(&pool);
                    }
                });

                let wakeup = db.workflows.run_notify();
                let entities = EntityStore::new(Arc::new(db.documents.clone()), registry);
                (entities, Arc::new(db.workflows), wakeup)
            }
            EntityStoreKind::Memory => {
                warn!("Using in-memory entity store; data is lost on restart");
                let workflows = MemoryWorkflowRepository::new();
                let wakeup = workflows.run_notify();
                let entities = EntityStore::new(Arc::new(MemoryDocumentStore::new()), registry);
                (entities, Arc::new(workflows), wakeup)
            }
        };

    // Blob storage with signed read links
    let secret = if config.blob_signing_secret.is_empty() {
        warn!("BLOB_SIGNING_SECRET not set; signed links will not survive a restart");
        uuid::Uuid::new_v4().to_string()
    } else {
        config.blob_signing_secret.clone()
    };
    let signer = UrlSigner::new(secret, &config.public_base_url)?;
    let objects: Arc<dyn ObjectStore> = match config.object_store {
        ObjectStoreKind::Filesystem => {
            let store = FilesystemObjectStore::new(&config.blob_storage_path, signer.clone());
            if let Err(e) = store.validate().await {
                anyhow::bail!(
                    "blob storage at {} is not usable: {}",
                    config.blob_storage_path,
                    e
                );
            }
            info!(path = %config.blob_storage_path, "Blob storage ready");
            Arc::new(store)
        }
        ObjectStoreKind::Memory => {
            warn!("Using in-memory blob storage; uploads are lost on restart");
            Arc::new(MemoryObjectStore::new(signer.clone()))
        }
    };

    let kb = QnaMakerClient::from_env()?;
    info!(kb_id = %kb.config().kb_id, "Knowledge base client configured");

    let hub = NotificationHub::new(defaults::NOTIFICATION_HUB_CAPACITY);
    let state = AppState::new(
        AppDeps {
            entities,
            objects,
            signer,
            kb: Arc::new(kb),
            workflows: workflows.clone(),
            hub,
            delivery: Arc::new(LoggingInvitationDelivery),
        },
        OrchestratorConfig::from_env(),
        &config,
    );

    // Workflow worker
    let worker = WorkerBuilder::new(workflows)
        .with_config(WorkerConfig::from_env())
        .with_handlers(state.orchestrator.handlers())
        .with_wakeup(wakeup)
        .build()
        .await;
    let worker_handle = worker.start();
    let mut worker_events = worker_handle.events();
    tokio::spawn(async move {
        loop {
            match worker_events.recv().await {
                Ok(WorkerEvent::RunFailed {
                    run_id,
                    kind,
                    error,
                    will_retry,
                }) => {
                    warn!(%run_id, %kind, will_retry, error = %error, "Workflow run failed");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    info!("Workflow worker started");

    let app = router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    worker_handle.shutdown().await?;
    Ok(())
}
