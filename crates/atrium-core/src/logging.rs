//! Structured logging schema and field name constants for atrium.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Failed workflow instance, knowledge base error |
//! | WARN  | Recoverable issue: revision conflict retried, notification dropped |
//! | INFO  | Lifecycle events, workflow start/finish, state transitions |
//! | DEBUG | Per-attempt poll checks, intermediate values, config choices |
//! | TRACE | Per-item iteration (entity queries, blob writes) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → workflow → sub-calls.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "kb", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "poller", "worker", "entity_store", "qna"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "provision", "submit_update", "claim_next", "upsert"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Workspace identifier being operated on.
pub const WORKSPACE_ID: &str = "workspace_id";

/// User identifier being operated on.
pub const USER_ID: &str = "user_id";

/// Invitation identifier being operated on.
pub const INVITATION_ID: &str = "invitation_id";

/// Workflow run UUID being processed.
pub const WORKFLOW_ID: &str = "workflow_id";

/// Workflow kind (provision, delete_source, ...).
pub const WORKFLOW_KIND: &str = "workflow_kind";

/// Activity name within a workflow.
pub const ACTIVITY: &str = "activity";

/// Knowledge base long-running operation id.
pub const OPERATION_ID: &str = "operation_id";

/// Entity kind (workspace, user, invitation, note).
pub const ENTITY_KIND: &str = "entity_kind";

/// Blob path inside the object store.
pub const BLOB_PATH: &str = "blob_path";

/// Notification event name.
pub const EVENT_NAME: &str = "event_name";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Poll attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Entity revision after a write.
pub const REVISION: &str = "revision";
