//! Core traits for atrium abstractions.
//!
//! These are the seams between the orchestrator and its external
//! collaborators: the document database, blob storage, the knowledge base,
//! real-time fan-out, invitation delivery and the workflow run queue.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::entity::{Document, EntityKind, EntityQuery};
use crate::events::Notification;
use crate::models::*;
use crate::Result;

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Partitioned document database holding every entity kind.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document.
    async fn get(&self, container: &str, kind: EntityKind, id: &str) -> Result<Option<Document>>;

    /// Conditionally write a document and return its new revision.
    ///
    /// `doc.revision == 0` inserts (conflict if the id exists); otherwise the
    /// stored revision must equal `doc.revision`. Mismatches are
    /// [`Error::Conflict`](crate::Error::Conflict).
    async fn put(&self, container: &str, doc: Document) -> Result<i64>;

    /// Remove a document. Returns whether it existed.
    async fn remove(&self, container: &str, kind: EntityKind, id: &str) -> Result<bool>;

    /// Filtered, sorted, paged listing of one kind.
    async fn query(
        &self,
        container: &str,
        kind: EntityKind,
        query: &EntityQuery,
    ) -> Result<Vec<Document>>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Binary content storage with time-limited signed read access.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) the object at `path`.
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()>;

    /// Read an object and its content type.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, String)>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete an object; missing objects are not an error. Returns whether
    /// something was deleted.
    async fn delete_if_exists(&self, path: &str) -> Result<bool>;

    /// A URL granting read access to `path` until `ttl` elapses.
    fn signed_read_url(&self, path: &str, ttl: Duration) -> Result<String>;
}

// =============================================================================
// KNOWLEDGE BASE
// =============================================================================

/// External question-answering index.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Submit a batched add/update/delete; returns a long-running handle.
    async fn submit_update(&self, kb_id: &str, update: &KbUpdate) -> Result<OperationHandle>;

    /// Current state of a long-running operation.
    async fn operation_status(&self, operation_id: &str) -> Result<OperationHandle>;

    /// Publish the knowledge base so queries see recent updates.
    async fn publish(&self, kb_id: &str) -> Result<()>;

    async fn query(&self, kb_id: &str, query: &KbQuery) -> Result<Vec<ScoredAnswer>>;

    /// Entries currently filed under `source_name`.
    async fn download_entries(&self, kb_id: &str, source_name: &str) -> Result<Vec<KbEntry>>;
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Push named events at a user or a workspace group.
///
/// Delivery is at-least-once and unordered across targets.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<()>;
}

/// Out-of-band delivery of invitations (email or similar).
#[async_trait]
pub trait InvitationDelivery: Send + Sync {
    async fn deliver(&self, invitation: &Invitation) -> Result<()>;
}

// =============================================================================
// WORKFLOW RUNS
// =============================================================================

/// Repository for durable workflow runs.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Queue a run. If an incomplete run with the same instance key exists,
    /// its id is returned instead.
    async fn enqueue(
        &self,
        kind: WorkflowKind,
        instance_key: &str,
        input: JsonValue,
    ) -> Result<Uuid>;

    /// Claim the oldest pending run whose kind is in `kinds` (any kind when
    /// empty), marking it running.
    async fn claim_next(&self, kinds: &[WorkflowKind]) -> Result<Option<WorkflowRun>>;

    /// Persist progress of a running run.
    async fn save_checkpoint(&self, run_id: Uuid, checkpoint: &WorkflowCheckpoint) -> Result<()>;

    async fn complete(&self, run_id: Uuid) -> Result<()>;

    /// Record a failure. When `retryable` and attempts remain, the run goes
    /// back to pending and keeps its checkpoint; otherwise it is failed.
    async fn fail(&self, run_id: Uuid, error: &str, retryable: bool) -> Result<()>;

    /// Put a failed run back in the queue, keeping its checkpoint.
    async fn retry(&self, run_id: Uuid) -> Result<bool>;

    /// Requeue runs left running for longer than `older_than`.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64>;

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>>;

    async fn list_for_instance(&self, instance_key: &str) -> Result<Vec<WorkflowRun>>;

    async fn stats(&self) -> Result<WorkflowStats>;
}
