//! In-memory document store and workflow repository.
//!
//! Same semantics as the PostgreSQL implementations (revision
//! compare-and-swap, instance-key de-duplication, checkpoint retention).
//! Used by tests and by `ENTITY_STORE=memory` development servers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use atrium_core::{
    defaults, new_v7, Document, DocumentStore, EntityKind, EntityQuery, Error, Result,
    SortDirection, WorkflowCheckpoint, WorkflowKind, WorkflowRepository, WorkflowRun,
    WorkflowStats, WorkflowStatus,
};

// =============================================================================
// DOCUMENTS
// =============================================================================

type DocumentKey = (String, EntityKind, String);

#[derive(Default, Clone)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentKey, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

/// Orders two JSON scalars; missing values sort last.
fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, container: &str, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(container.to_string(), kind, id.to_string()))
            .cloned())
    }

    async fn put(&self, container: &str, doc: Document) -> Result<i64> {
        let mut documents = self.documents.write().await;
        let key = (container.to_string(), doc.kind, doc.id.clone());
        let current = documents.get(&key).map(|d| d.revision);

        let next = match (current, doc.revision) {
            (None, 0) => 1,
            (Some(stored), expected) if expected != 0 && stored == expected => stored + 1,
            (stored, expected) => {
                return Err(Error::Conflict(format!(
                    "{} {} is not at revision {} (stored: {:?})",
                    doc.kind, doc.id, expected, stored
                )))
            }
        };

        documents.insert(
            key,
            Document {
                revision: next,
                ..doc
            },
        );
        Ok(next)
    }

    async fn remove(&self, container: &str, kind: EntityKind, id: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        Ok(documents
            .remove(&(container.to_string(), kind, id.to_string()))
            .is_some())
    }

    async fn query(
        &self,
        container: &str,
        kind: EntityKind,
        query: &EntityQuery,
    ) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        let mut matched: Vec<Document> = documents
            .iter()
            .filter(|((c, k, _), doc)| c == container && *k == kind && query.matches(&doc.body))
            .map(|(_, doc)| doc.clone())
            .collect();

        matched.sort_by(|a, b| {
            let primary = match &query.sort_key {
                Some(key) => compare_json(a.body.get(key), b.body.get(key)),
                None => Ordering::Equal,
            };
            let ordering = primary.then_with(|| a.id.cmp(&b.id));
            match query.sort_direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        Ok(matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }
}

// =============================================================================
// WORKFLOW RUNS
// =============================================================================

#[derive(Clone)]
pub struct MemoryWorkflowRepository {
    runs: Arc<RwLock<HashMap<Uuid, WorkflowRun>>>,
    notify: Arc<Notify>,
    max_attempts: i32,
}

impl Default for MemoryWorkflowRepository {
    fn default() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            max_attempts: defaults::WORKFLOW_MAX_ATTEMPTS,
        }
    }
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many claims a run may consume before it stays failed.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Notify handle signalled whenever a run becomes pending.
    pub fn run_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    async fn update_run<F>(&self, run_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowRun),
    {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::not_found("workflow run", &run_id.to_string()))?;
        apply(run);
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for MemoryWorkflowRepository {
    async fn enqueue(
        &self,
        kind: WorkflowKind,
        instance_key: &str,
        input: JsonValue,
    ) -> Result<Uuid> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs
            .values()
            .find(|r| r.instance_key == instance_key && !r.status.is_terminal())
        {
            return Ok(existing.id);
        }

        let run = WorkflowRun {
            id: new_v7(),
            kind,
            instance_key: instance_key.to_string(),
            status: WorkflowStatus::Pending,
            input,
            checkpoint: WorkflowCheckpoint::default(),
            error_message: None,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = run.id;
        runs.insert(id, run);
        drop(runs);

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn claim_next(&self, kinds: &[WorkflowKind]) -> Result<Option<WorkflowRun>> {
        let mut runs = self.runs.write().await;
        let next = runs
            .values_mut()
            .filter(|r| r.status == WorkflowStatus::Pending)
            .filter(|r| kinds.is_empty() || kinds.contains(&r.kind))
            .min_by_key(|r| (r.created_at, r.id));

        Ok(next.map(|run| {
            run.status = WorkflowStatus::Running;
            run.started_at = Some(Utc::now());
            run.attempts += 1;
            run.clone()
        }))
    }

    async fn save_checkpoint(&self, run_id: Uuid, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let checkpoint = checkpoint.clone();
        self.update_run(run_id, move |run| run.checkpoint = checkpoint)
            .await
    }

    async fn complete(&self, run_id: Uuid) -> Result<()> {
        self.update_run(run_id, |run| {
            run.status = WorkflowStatus::Completed;
            run.completed_at = Some(Utc::now());
            run.error_message = None;
        })
        .await
    }

    async fn fail(&self, run_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let mut requeued = false;
        self.update_run(run_id, |run| {
            run.error_message = Some(error.to_string());
            if retryable && run.attempts < run.max_attempts {
                run.status = WorkflowStatus::Pending;
                run.started_at = None;
                requeued = true;
            } else {
                run.status = WorkflowStatus::Failed;
                run.completed_at = Some(Utc::now());
            }
        })
        .await?;
        if requeued {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn retry(&self, run_id: Uuid) -> Result<bool> {
        let mut runs = self.runs.write().await;
        let (instance_key, status) = match runs.get(&run_id) {
            Some(run) => (run.instance_key.clone(), run.status),
            None => return Err(Error::not_found("workflow run", &run_id.to_string())),
        };
        if status != WorkflowStatus::Failed {
            return Ok(false);
        }
        let blocked = runs
            .values()
            .any(|r| r.id != run_id && r.instance_key == instance_key && !r.status.is_terminal());
        if blocked {
            return Ok(false);
        }
        if let Some(run) = runs.get_mut(&run_id) {
            run.status = WorkflowStatus::Pending;
            run.attempts = 0;
            run.started_at = None;
            run.completed_at = None;
        }
        drop(runs);
        self.notify.notify_waiters();
        Ok(true)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let mut runs = self.runs.write().await;
        let mut count = 0;
        for run in runs.values_mut() {
            let stale = run.status == WorkflowStatus::Running
                && run.started_at.map(|t| t <= cutoff).unwrap_or(true);
            if stale {
                run.status = WorkflowStatus::Pending;
                run.started_at = None;
                count += 1;
            }
        }
        drop(runs);
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_for_instance(&self, instance_key: &str) -> Result<Vec<WorkflowRun>> {
        let runs = self.runs.read().await;
        let mut matched: Vec<WorkflowRun> = runs
            .values()
            .filter(|r| r.instance_key == instance_key)
            .cloned()
            .collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(matched)
    }

    async fn stats(&self) -> Result<WorkflowStats> {
        let runs = self.runs.read().await;
        let mut stats = WorkflowStats::default();
        for run in runs.values() {
            match run.status {
                WorkflowStatus::Pending => stats.pending += 1,
                WorkflowStatus::Running => stats.running += 1,
                WorkflowStatus::Completed => stats.completed += 1,
                WorkflowStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, revision: i64, body: JsonValue) -> Document {
        Document {
            kind: EntityKind::Note,
            id: id.to_string(),
            partition_key: "ws-1".to_string(),
            revision,
            body,
        }
    }

    #[tokio::test]
    async fn test_insert_then_conditional_update() {
        let store = MemoryDocumentStore::new();
        let rev = store.put("core", doc("n1", 0, json!({"v": 1}))).await.unwrap();
        assert_eq!(rev, 1);

        let rev = store.put("core", doc("n1", 1, json!({"v": 2}))).await.unwrap();
        assert_eq!(rev, 2);

        let stored = store.get("core", EntityKind::Note, "n1").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.body["v"], 2);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryDocumentStore::new();
        store.put("core", doc("n1", 0, json!({}))).await.unwrap();
        store.put("core", doc("n1", 1, json!({}))).await.unwrap();

        let err = store.put("core", doc("n1", 1, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = MemoryDocumentStore::new();
        store.put("core", doc("n1", 0, json!({}))).await.unwrap();
        let err = store.put("core", doc("n1", 0, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_of_missing_document_conflicts() {
        let store = MemoryDocumentStore::new();
        let err = store.put("core", doc("gone", 3, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_containers_are_isolated() {
        let store = MemoryDocumentStore::new();
        store.put("a", doc("n1", 0, json!({}))).await.unwrap();
        assert!(store.get("b", EntityKind::Note, "n1").await.unwrap().is_none());
        assert!(store.remove("a", EntityKind::Note, "n1").await.unwrap());
        assert!(!store.remove("a", EntityKind::Note, "n1").await.unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_pages() {
        let store = MemoryDocumentStore::new();
        for (id, ws, created) in [
            ("n1", "ws-1", "2026-01-01T00:00:00Z"),
            ("n2", "ws-1", "2026-01-03T00:00:00Z"),
            ("n3", "ws-2", "2026-01-02T00:00:00Z"),
            ("n4", "ws-1", "2026-01-02T00:00:00Z"),
        ] {
            store
                .put(
                    "core",
                    doc(id, 0, json!({"workspace_id": ws, "created_at": created})),
                )
                .await
                .unwrap();
        }

        let query = EntityQuery::new()
            .filter("workspace_id", "ws-1")
            .sort_by("created_at", SortDirection::Desc)
            .page(0, 2);
        let ids: Vec<String> = store
            .query("core", EntityKind::Note, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["n2", "n4"]);

        let query = query.page(2, 2);
        let rest = store.query("core", EntityKind::Note, &query).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "n1");
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_incomplete_instance() {
        let repo = MemoryWorkflowRepository::new();
        let a = repo
            .enqueue(WorkflowKind::Provision, "ws-1", json!({}))
            .await
            .unwrap();
        let b = repo
            .enqueue(WorkflowKind::Provision, "ws-1", json!({}))
            .await
            .unwrap();
        assert_eq!(a, b);

        repo.claim_next(&[]).await.unwrap().unwrap();
        repo.complete(a).await.unwrap();
        let c = repo
            .enqueue(WorkflowKind::Provision, "ws-1", json!({}))
            .await
            .unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_claim_respects_kind_filter_and_order() {
        let repo = MemoryWorkflowRepository::new();
        let first = repo
            .enqueue(WorkflowKind::DeleteSource, "a", json!({}))
            .await
            .unwrap();
        repo.enqueue(WorkflowKind::Provision, "b", json!({}))
            .await
            .unwrap();

        let claimed = repo
            .claim_next(&[WorkflowKind::Provision])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.kind, WorkflowKind::Provision);
        assert_eq!(claimed.attempts, 1);

        let claimed = repo.claim_next(&[]).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert!(repo.claim_next(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_until_attempts_exhausted() {
        let repo = MemoryWorkflowRepository::new().with_max_attempts(2);
        let id = repo
            .enqueue(WorkflowKind::Provision, "ws", json!({}))
            .await
            .unwrap();

        repo.claim_next(&[]).await.unwrap();
        repo.fail(id, "blip", true).await.unwrap();
        assert_eq!(
            repo.get(id).await.unwrap().unwrap().status,
            WorkflowStatus::Pending
        );

        repo.claim_next(&[]).await.unwrap();
        repo.fail(id, "blip again", true).await.unwrap();
        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("blip again"));
    }

    #[tokio::test]
    async fn test_retry_keeps_checkpoint() {
        let repo = MemoryWorkflowRepository::new();
        let id = repo
            .enqueue(WorkflowKind::DeleteWorkspace, "ws", json!({}))
            .await
            .unwrap();
        repo.claim_next(&[]).await.unwrap();
        let mut cp = WorkflowCheckpoint::default();
        cp.mark_done("detach_members");
        repo.save_checkpoint(id, &cp).await.unwrap();
        repo.fail(id, "boom", false).await.unwrap();

        assert!(repo.retry(id).await.unwrap());
        let run = repo.claim_next(&[]).await.unwrap().unwrap();
        assert!(run.checkpoint.is_done("detach_members"));
    }

    #[tokio::test]
    async fn test_requeue_stale_running_runs() {
        let repo = MemoryWorkflowRepository::new();
        let id = repo
            .enqueue(WorkflowKind::Provision, "ws", json!({}))
            .await
            .unwrap();
        repo.claim_next(&[]).await.unwrap();

        assert_eq!(repo.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(repo.requeue_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(
            repo.get(id).await.unwrap().unwrap().status,
            WorkflowStatus::Pending
        );
        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }
}
