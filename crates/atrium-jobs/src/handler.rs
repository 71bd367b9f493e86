//! Workflow handlers and the per-run execution context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use atrium_core::{
    Error, Result, WorkflowCheckpoint, WorkflowKind, WorkflowRepository, WorkflowRun,
};

/// Context provided to workflow handlers.
///
/// Activities consult [`is_done`](Self::is_done) before running and call
/// [`complete_activity`](Self::complete_activity) afterwards, which persists
/// the checkpoint so a restarted run resumes after the last finished
/// activity.
pub struct WorkflowContext {
    /// The run being executed.
    pub run: WorkflowRun,
    checkpoint: WorkflowCheckpoint,
    repository: Arc<dyn WorkflowRepository>,
}

impl WorkflowContext {
    pub fn new(run: WorkflowRun, repository: Arc<dyn WorkflowRepository>) -> Self {
        let checkpoint = run.checkpoint.clone();
        Self {
            run,
            checkpoint,
            repository,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.run.kind
    }

    /// Typed workflow input.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T> {
        self.run.input_as()
    }

    pub fn is_done(&self, activity: &str) -> bool {
        self.checkpoint.is_done(activity)
    }

    /// Activity-owned state carried across restarts.
    pub fn state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.checkpoint.get(key)
    }

    /// Like [`state`](Self::state) but absence is an internal error.
    pub fn require_state<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.state(key)?.ok_or_else(|| {
            Error::Workflow(format!(
                "{} run {} has no checkpoint value {}",
                self.run.kind, self.run.id, key
            ))
        })
    }

    /// Stage a state value; persisted with the next completed activity.
    pub fn set_state<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.checkpoint.put(key, value)
    }

    /// Mark an activity finished and persist the checkpoint.
    pub async fn complete_activity(&mut self, activity: &str) -> Result<()> {
        self.checkpoint.mark_done(activity);
        self.repository
            .save_checkpoint(self.run.id, &self.checkpoint)
            .await?;
        debug!(
            subsystem = "jobs",
            component = "workflow",
            workflow_id = %self.run.id,
            workflow_kind = self.run.kind.as_str(),
            activity,
            "Activity completed"
        );
        Ok(())
    }

    pub fn checkpoint(&self) -> &WorkflowCheckpoint {
        &self.checkpoint
    }
}

/// Result of a workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// Every activity finished.
    Completed,
    /// Terminal failure; the run needs an explicit retry.
    Failed(String),
    /// Transient failure; the run goes back to the queue while attempts remain.
    Retry(String),
}

impl WorkflowOutcome {
    /// Transient errors retry, everything else fails the run.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => WorkflowOutcome::Completed,
            Err(e) if e.is_transient() => WorkflowOutcome::Retry(e.to_string()),
            Err(e) => WorkflowOutcome::Failed(e.to_string()),
        }
    }
}

/// Trait for workflow handlers.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    /// The workflow kind this handler runs.
    fn kind(&self) -> WorkflowKind;

    /// Execute (or resume) one run.
    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome;

    fn can_handle(&self, kind: WorkflowKind) -> bool {
        self.kind() == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use atrium_core::{WorkflowStats, WorkflowStatus};

    /// Records saved checkpoints only.
    #[derive(Default)]
    struct CheckpointSink {
        saved: tokio::sync::Mutex<Vec<WorkflowCheckpoint>>,
    }

    #[async_trait]
    impl WorkflowRepository for CheckpointSink {
        async fn enqueue(&self, _: WorkflowKind, _: &str, _: serde_json::Value) -> Result<Uuid> {
            unimplemented!()
        }
        async fn claim_next(&self, _: &[WorkflowKind]) -> Result<Option<WorkflowRun>> {
            Ok(None)
        }
        async fn save_checkpoint(&self, _: Uuid, checkpoint: &WorkflowCheckpoint) -> Result<()> {
            self.saved.lock().await.push(checkpoint.clone());
            Ok(())
        }
        async fn complete(&self, _: Uuid) -> Result<()> {
            Ok(())
        }
        async fn fail(&self, _: Uuid, _: &str, _: bool) -> Result<()> {
            Ok(())
        }
        async fn retry(&self, _: Uuid) -> Result<bool> {
            Ok(false)
        }
        async fn requeue_stale(&self, _: std::time::Duration) -> Result<u64> {
            Ok(0)
        }
        async fn get(&self, _: Uuid) -> Result<Option<WorkflowRun>> {
            Ok(None)
        }
        async fn list_for_instance(&self, _: &str) -> Result<Vec<WorkflowRun>> {
            Ok(vec![])
        }
        async fn stats(&self) -> Result<WorkflowStats> {
            Ok(WorkflowStats::default())
        }
    }

    fn run() -> WorkflowRun {
        WorkflowRun {
            id: Uuid::new_v4(),
            kind: WorkflowKind::Provision,
            instance_key: "provision:ws-1".to_string(),
            status: WorkflowStatus::Running,
            input: json!({"workspace_id": "ws-1", "source_paths": []}),
            checkpoint: WorkflowCheckpoint::default(),
            error_message: None,
            attempts: 1,
            max_attempts: 3,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_complete_activity_persists_staged_state() {
        let sink = Arc::new(CheckpointSink::default());
        let mut ctx = WorkflowContext::new(run(), sink.clone());

        ctx.set_state("operation_id", &"op-1").unwrap();
        ctx.complete_activity("update_kb_sources").await.unwrap();

        assert!(ctx.is_done("update_kb_sources"));
        let saved = sink.saved.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(
            saved[0].get::<String>("operation_id").unwrap().as_deref(),
            Some("op-1")
        );
    }

    #[test]
    fn test_require_state_missing_is_workflow_error() {
        let ctx = WorkflowContext::new(run(), Arc::new(CheckpointSink::default()));
        let err = ctx.require_state::<String>("operation_id").unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
    }

    #[test]
    fn test_outcome_from_transient_error_retries() {
        let outcome = WorkflowOutcome::from_result(Err(Error::External("503".into())));
        assert!(matches!(outcome, WorkflowOutcome::Retry(_)));
    }

    #[test]
    fn test_outcome_from_operation_failure_fails() {
        let outcome = WorkflowOutcome::from_result(Err(Error::OperationFailed {
            operation_id: "op-1".into(),
            message: "bad file".into(),
        }));
        assert!(matches!(outcome, WorkflowOutcome::Failed(_)));
        assert_eq!(WorkflowOutcome::from_result(Ok(())), WorkflowOutcome::Completed);
    }

    #[test]
    fn test_input_decodes_typed_payload() {
        #[derive(serde::Deserialize)]
        struct Input {
            workspace_id: String,
        }
        let ctx = WorkflowContext::new(run(), Arc::new(CheckpointSink::default()));
        assert_eq!(ctx.input::<Input>().unwrap().workspace_id, "ws-1");
    }
}
