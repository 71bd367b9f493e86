//! Background worker lifecycle: start, process enqueued runs, shut down.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, Notify};
use tokio::time::timeout;

use atrium_core::{SourceStatus, WorkflowKind, WorkflowRepository, WorkspaceStatus};
use atrium_db::MemoryWorkflowRepository;
use atrium_jobs::{
    WorkerBuilder, WorkerConfig, WorkerEvent, WorkflowContext, WorkflowHandler, WorkflowOutcome,
};
use atrium_kb::mock::ScriptedKnowledgeBase;
use common::Harness;

async fn next_event(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("worker event within 5s")
        .expect("event channel open")
}

#[tokio::test]
async fn test_started_worker_provisions_and_stops() {
    let h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["paper.pdf"]).await;

    let worker = WorkerBuilder::new(Arc::new(h.workflows.clone()))
        .with_config(WorkerConfig::default().with_poll_interval(20))
        .with_handlers(h.orchestrator.handlers())
        .with_wakeup(h.workflows.run_notify())
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    assert!(matches!(next_event(&mut events).await, WorkerEvent::WorkerStarted));

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    match next_event(&mut events).await {
        WorkerEvent::RunStarted { run_id: started, .. } => assert_eq!(started, run_id),
        other => panic!("unexpected event {:?}", other),
    }
    match next_event(&mut events).await {
        WorkerEvent::RunCompleted { run_id: done, .. } => assert_eq!(done, run_id),
        other => panic!("unexpected event {:?}", other),
    }

    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.status, WorkspaceStatus::Published);
    assert_eq!(stored.sources[0].status, SourceStatus::Published);

    handle.shutdown().await.unwrap();
    assert!(matches!(next_event(&mut events).await, WorkerEvent::WorkerStopped));
}

#[tokio::test]
async fn test_failed_run_reports_will_retry() {
    let kb = ScriptedKnowledgeBase::new();
    kb.fail_next_submit("service unavailable");
    let h = Harness::new(kb).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["paper.pdf"]).await;

    let worker = WorkerBuilder::new(Arc::new(h.workflows.clone()))
        .with_config(WorkerConfig::default().with_poll_interval(20))
        .with_handlers(h.orchestrator.handlers())
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    let mut saw_retry = false;
    loop {
        match next_event(&mut events).await {
            WorkerEvent::RunFailed {
                run_id: failed,
                will_retry,
                error,
                ..
            } => {
                assert_eq!(failed, run_id);
                assert!(will_retry);
                assert!(error.contains("service unavailable"));
                saw_retry = true;
            }
            WorkerEvent::RunCompleted { run_id: done, .. } => {
                assert_eq!(done, run_id);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_retry);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_worker_never_claims() {
    let h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["paper.pdf"]).await;
    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();

    let worker = WorkerBuilder::new(Arc::new(h.workflows.clone()))
        .with_config(WorkerConfig::default().with_enabled(false))
        .with_handlers(h.orchestrator.handlers())
        .build()
        .await;
    let _handle = worker.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, atrium_core::WorkflowStatus::Pending);
}

/// Completes once `release` is notified, or immediately without one.
struct GatedHandler {
    kind: WorkflowKind,
    release: Option<Arc<Notify>>,
}

#[async_trait]
impl WorkflowHandler for GatedHandler {
    fn kind(&self) -> WorkflowKind {
        self.kind
    }

    async fn execute(&self, _ctx: &mut WorkflowContext) -> WorkflowOutcome {
        if let Some(release) = &self.release {
            release.notified().await;
        }
        WorkflowOutcome::Completed
    }
}

#[tokio::test]
async fn test_long_run_does_not_hold_back_later_claims() {
    let workflows = MemoryWorkflowRepository::new();
    let release = Arc::new(Notify::new());
    let slow = workflows
        .enqueue(WorkflowKind::DeleteWorkspace, "slow", json!({}))
        .await
        .unwrap();
    let mut quick = Vec::new();
    for key in ["quick-1", "quick-2", "quick-3"] {
        quick.push(
            workflows
                .enqueue(WorkflowKind::AnswerQuestion, key, json!({}))
                .await
                .unwrap(),
        );
    }

    let worker = WorkerBuilder::new(Arc::new(workflows.clone()))
        .with_config(
            WorkerConfig::default()
                .with_poll_interval(20)
                .with_max_concurrent(2),
        )
        .with_handler(Arc::new(GatedHandler {
            kind: WorkflowKind::DeleteWorkspace,
            release: Some(release.clone()),
        }))
        .with_handler(Arc::new(GatedHandler {
            kind: WorkflowKind::AnswerQuestion,
            release: None,
        }))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let mut completed = Vec::new();
    while completed.len() < quick.len() {
        if let WorkerEvent::RunCompleted { run_id, .. } = next_event(&mut events).await {
            assert_ne!(run_id, slow, "slow run finished before being released");
            completed.push(run_id);
        }
    }
    completed.sort();
    quick.sort();
    assert_eq!(completed, quick);

    release.notify_one();
    loop {
        if let WorkerEvent::RunCompleted { run_id, .. } = next_event(&mut events).await {
            assert_eq!(run_id, slow);
            break;
        }
    }
    handle.shutdown().await.unwrap();
}
