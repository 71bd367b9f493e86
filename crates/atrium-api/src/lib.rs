//! # atrium-api
//!
//! HTTP surface of atrium: identity-scoped endpoints for workspaces, notes,
//! messaging and invitations, a server-sent event stream of notifications,
//! and signed blob downloads. Long-running work is handed to the workspace
//! orchestrator and executed by the workflow worker.

pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use atrium_core::{
    EntityStore, InvitationDelivery, KnowledgeBase, NotificationHub, ObjectStore,
    WorkflowRepository,
};
use atrium_db::UrlSigner;
use atrium_jobs::{InvitationFlow, OrchestratorConfig, OrchestratorDeps, WorkspaceOrchestrator};

pub use config::ApiConfig;
pub use error::ApiError;
pub use identity::Caller;
use services::{
    GroupPruningPublisher, MessagingService, NoteService, RealtimeGroups, RealtimeService,
    WorkspaceService,
};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Collaborators the server is assembled from.
pub struct AppDeps {
    pub entities: EntityStore,
    pub objects: Arc<dyn ObjectStore>,
    /// Verifies links issued by `objects`.
    pub signer: UrlSigner,
    pub kb: Arc<dyn KnowledgeBase>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub hub: NotificationHub,
    pub delivery: Arc<dyn InvitationDelivery>,
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub entities: EntityStore,
    pub objects: Arc<dyn ObjectStore>,
    pub signer: UrlSigner,
    pub hub: NotificationHub,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub orchestrator: WorkspaceOrchestrator,
    pub invitations: InvitationFlow,
    pub workspaces: WorkspaceService,
    pub notes: NoteService,
    pub messaging: MessagingService,
    pub realtime: RealtimeService,
}

impl AppState {
    pub fn new(deps: AppDeps, orchestrator_config: OrchestratorConfig, config: &ApiConfig) -> Self {
        let groups = RealtimeGroups::new();
        let orchestrator = WorkspaceOrchestrator::new(
            OrchestratorDeps {
                entities: deps.entities.clone(),
                objects: deps.objects.clone(),
                kb: deps.kb,
                publisher: Arc::new(GroupPruningPublisher::new(
                    groups.clone(),
                    Arc::new(deps.hub.clone()),
                )),
                workflows: deps.workflows.clone(),
            },
            orchestrator_config,
        );
        let notifier = orchestrator.notifier().clone();
        let invitations = InvitationFlow::new(
            deps.entities.clone(),
            orchestrator.mutator().clone(),
            notifier.clone(),
            deps.delivery,
        );

        Self {
            workspaces: WorkspaceService::new(
                deps.entities.clone(),
                deps.objects.clone(),
                orchestrator.clone(),
                config.secure_url_ttl,
            ),
            notes: NoteService::new(deps.entities.clone(), notifier.clone()),
            messaging: MessagingService::new(
                deps.entities.clone(),
                notifier,
                orchestrator.clone(),
            ),
            realtime: RealtimeService::new(deps.entities.clone(), groups),
            entities: deps.entities,
            objects: deps.objects,
            signer: deps.signer,
            hub: deps.hub,
            workflows: deps.workflows,
            orchestrator,
            invitations,
        }
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the full router with middleware.
pub fn router(state: AppState, config: &ApiConfig) -> Router {
    use handlers::{blobs, invitations, messaging, notes, realtime, workflows, workspaces};

    let allowed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    Router::new()
        .route("/health", get(handlers::health_check))
        // Identity
        .route("/api/v1/identity", post(workspaces::sign_in))
        // Workspaces
        .route("/api/v1/workspaces", post(workspaces::create_workspace))
        .route(
            "/api/v1/workspaces/:id",
            get(workspaces::get_workspace).delete(workspaces::delete_workspace),
        )
        .route("/api/v1/workspaces/:id/files", post(workspaces::add_files))
        .route(
            "/api/v1/workspaces/:id/sources/:index",
            delete(workspaces::delete_source),
        )
        .route(
            "/api/v1/workspaces/:id/sources/:index/secure",
            get(workspaces::secure_content_url),
        )
        // Invitations
        .route(
            "/api/v1/workspaces/:id/invitations",
            post(invitations::create_invitation),
        )
        .route(
            "/api/v1/workspaces/:id/invitations/:status",
            get(invitations::list_workspace_invitations),
        )
        .route(
            "/api/v1/invitations/pending",
            get(invitations::list_pending_invitations),
        )
        .route(
            "/api/v1/invitations/:id/accept",
            post(invitations::accept_invitation),
        )
        // Notes
        .route("/api/v1/workspaces/:id/notes", get(notes::list_notes))
        .route("/api/v1/notes", post(notes::save_note))
        .route("/api/v1/notes/:id", delete(notes::delete_note))
        .route("/api/v1/notes/:id/comments", post(notes::add_comment))
        // Messaging
        .route("/api/v1/messages/chat", post(messaging::send_chat))
        .route("/api/v1/messages/ask", post(messaging::ask_question))
        // Workflow runs
        .route("/api/v1/workflows/stats", get(workflows::workflow_stats))
        .route("/api/v1/workflows/:id", get(workflows::get_workflow))
        .route("/api/v1/workflows/:id/retry", post(workflows::retry_workflow))
        // Real-time
        .route("/api/v1/events", get(realtime::sse_events))
        .route(
            "/api/v1/realtime/groups/:id",
            post(realtime::join_group).delete(realtime::leave_group),
        )
        // Signed blob downloads
        .route("/blobs/*path", get(blobs::download_blob))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static(identity::USER_ID_HEADER),
                    HeaderName::from_static(identity::USER_EMAIL_HEADER),
                    HeaderName::from_static(identity::USER_FIRST_NAME_HEADER),
                    HeaderName::from_static(identity::USER_LAST_NAME_HEADER),
                ])
                .allow_credentials(true)
                .max_age(Duration::from_secs(3600)),
        )
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}
