//! Centralized default constants for atrium.
//!
//! All crates reference these constants instead of defining their own
//! magic numbers. Organized by domain area.

// =============================================================================
// KNOWLEDGE BASE OPERATIONS
// =============================================================================

/// Interval between operation status checks (milliseconds).
pub const KB_POLL_INTERVAL_MS: u64 = 3_000;

/// Status checks before an operation is declared timed out.
pub const KB_POLL_MAX_ATTEMPTS: u32 = 20;

/// Answers requested per question.
pub const ANSWER_TOP: u32 = 3;

/// Minimum answer score returned by the knowledge base.
pub const ANSWER_SCORE_THRESHOLD: f64 = 10.0;

/// Metadata tag carrying the source name of a knowledge base entry.
pub const KB_SOURCE_TAG: &str = "source";

/// Metadata tag carrying the owning workspace id of a knowledge base entry.
pub const KB_WORKSPACE_TAG: &str = "workspace";

/// HTTP timeout for knowledge base calls (seconds).
pub const KB_TIMEOUT_SECS: u64 = 30;

/// Knowledge base environment used for entry downloads. Entries tagged
/// before the first publish only exist in the test index.
pub const KB_ENVIRONMENT: &str = "test";

/// Display name of synthetic answer messages.
pub const BOT_DISPLAY_NAME: &str = "Atrium";

/// Prefix of synthetic answer message ids.
pub const BOT_RESPONSE_ID_PREFIX: &str = "placeholder_response_";

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Lifetime of signed URLs handed to the knowledge base (seconds).
pub const PROVISION_URL_TTL_SECS: u64 = 600;

/// Lifetime of signed URLs handed to clients (seconds).
pub const SECURE_CONTENT_URL_TTL_SECS: u64 = 300;

/// Default filesystem root for blobs.
pub const BLOB_STORAGE_PATH: &str = "./data/blobs";

/// Default public base URL used in signed links.
pub const PUBLIC_BASE_URL: &str = "http://localhost:3000";

// =============================================================================
// ENTITY STORE
// =============================================================================

/// Default container shared by every entity kind.
pub const ENTITY_CONTAINER: &str = "core";

/// Re-read and reapply attempts after a revision conflict.
pub const REVISION_RETRY_LIMIT: u32 = 8;

/// Page size used when deleting notes in bulk.
pub const NOTE_DELETE_PAGE: i64 = 500;

/// Notes returned by a workspace note listing.
pub const NOTE_LIST_LIMIT: i64 = 100;

/// Invitations returned by one listing.
pub const INVITATION_LIST_LIMIT: i64 = 100;

// =============================================================================
// WORKFLOW WORKER
// =============================================================================

/// Interval between queue checks when idle (milliseconds).
pub const WORKFLOW_POLL_INTERVAL_MS: u64 = 500;

/// Concurrently running workflow instances per worker.
pub const WORKFLOW_MAX_CONCURRENT: usize = 8;

/// Upper bound on a single workflow run (seconds).
pub const WORKFLOW_TIMEOUT_SECS: u64 = 900;

/// Runs left `running` this long are considered abandoned (seconds).
pub const WORKFLOW_STALE_AFTER_SECS: u64 = 1_800;

/// Claims a run may consume before it stays failed.
pub const WORKFLOW_MAX_ATTEMPTS: i32 = 3;

/// Worker event broadcast buffer size.
pub const WORKER_EVENT_CAPACITY: usize = 256;

// =============================================================================
// REAL-TIME
// =============================================================================

/// Notification hub broadcast buffer size.
pub const NOTIFICATION_HUB_CAPACITY: usize = 256;

/// Keep-alive interval for server-sent event streams (seconds).
pub const SSE_KEEPALIVE_SECS: u64 = 15;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Maximum pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 20;

/// Minimum idle pooled connections.
pub const DB_MIN_CONNECTIONS: u32 = 2;

/// Connection acquire timeout (seconds).
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout (seconds).
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connection max lifetime (seconds).
pub const DB_MAX_LIFETIME_SECS: u64 = 1_800;
