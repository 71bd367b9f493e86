//! End-to-end workflow behavior against in-memory collaborators.

mod common;

use std::time::Duration;

use atrium_core::{
    defaults, MetadataPair, Note, NotificationEvent, NotificationTarget, ObjectStore,
    OperationState, SourceStatus, User, WorkflowRepository, WorkflowStatus, Workspace,
    WorkspaceStatus,
};
use atrium_db::MemoryWorkflowRepository;
use atrium_jobs::PollPolicy;
use atrium_kb::mock::ScriptedKnowledgeBase;
use chrono::Utc;
use common::Harness;

#[tokio::test]
async fn test_first_provision_publishes_workspace_and_notifies_creator() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf", "b.pdf"]).await;

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Completed);

    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.status, WorkspaceStatus::Published);
    assert_eq!(stored.sources.len(), 2);
    assert!(stored
        .sources
        .iter()
        .all(|s| s.status == SourceStatus::Published));

    // Entries are tagged so workspace-scoped queries find them.
    for source in &stored.sources {
        let entries = h.kb.entries_for(source.kb_source_name());
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .metadata
            .contains(&MetadataPair::new(defaults::KB_WORKSPACE_TAG, stored.id.as_str())));
        assert!(entries[0]
            .metadata
            .contains(&MetadataPair::new(defaults::KB_SOURCE_TAG, source.kb_source_name())));
    }
    assert_eq!(h.kb.publish_count(), 1);

    let events = h.drain();
    let provisioned: Vec<_> = events
        .iter()
        .filter(|n| n.event == NotificationEvent::WorkspaceDocumentsProvisioned)
        .collect();
    assert_eq!(provisioned.len(), 1);
    assert_eq!(provisioned[0].target, NotificationTarget::user("u1"));
    assert!(!events
        .iter()
        .any(|n| n.event == NotificationEvent::WorkspaceDocumentsAdded));
}

#[tokio::test]
async fn test_add_source_transitions_only_new_source_and_notifies_group() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf", "b.pdf"]).await;
    let before = workspace.sources.clone();
    h.kb.clear_calls();

    let source = h.upload(&workspace.id, "c.pdf", "u1").await;
    let new_path = source.storage_path.clone();
    let (pending, _) = h
        .orchestrator
        .start_add_source(&workspace.id, vec![source])
        .await
        .unwrap();
    assert_eq!(
        pending.source_by_path(&new_path).unwrap().status,
        SourceStatus::Publishing
    );
    h.worker.run_until_idle().await.unwrap();

    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.sources.len(), 3);
    assert_eq!(&stored.sources[..2], &before[..]);
    assert_eq!(
        stored.source_by_path(&new_path).unwrap().status,
        SourceStatus::Published
    );

    // Only the new file was sent for ingestion.
    let added: Vec<_> = h
        .kb
        .updates()
        .into_iter()
        .flat_map(|u| u.add)
        .collect();
    assert_eq!(added.len(), 1);
    assert!(new_path.ends_with(&added[0].file_name));

    let events = h.drain();
    let added_events: Vec<_> = events
        .iter()
        .filter(|n| n.event == NotificationEvent::WorkspaceDocumentsAdded)
        .collect();
    assert_eq!(added_events.len(), 1);
    assert_eq!(added_events[0].target, NotificationTarget::group(&workspace.id));
    assert!(!events
        .iter()
        .any(|n| n.event == NotificationEvent::WorkspaceDocumentsProvisioned));
}

#[tokio::test]
async fn test_publish_rerun_without_publishing_sources_is_noop() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf"]).await;

    h.orchestrator.start_provision(&workspace).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.revision, workspace.revision);
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn test_add_source_rejected_while_deleting() {
    let h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf"]).await;
    h.entities
        .update(&workspace.id, |ws: &mut Workspace| {
            ws.status = WorkspaceStatus::Deleting;
            Ok(true)
        })
        .await
        .unwrap();

    let source = h.upload(&workspace.id, "b.pdf", "u1").await;
    let err = h
        .orchestrator
        .start_add_source(&workspace.id, vec![source])
        .await
        .unwrap_err();
    assert!(matches!(err, atrium_core::Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_source_removes_only_target() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf", "b.pdf"]).await;
    let target = workspace.sources[0].clone();
    let survivor = workspace.sources[1].clone();

    let (marked, _) = h
        .orchestrator
        .start_delete_source(&workspace.id, 0)
        .await
        .unwrap();
    assert_eq!(marked.sources[0].status, SourceStatus::Deleting);
    h.worker.run_until_idle().await.unwrap();

    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.sources, vec![survivor.clone()]);
    assert!(!h.objects.exists(&target.storage_path).await.unwrap());
    assert!(h.objects.exists(&survivor.storage_path).await.unwrap());
    assert!(h.kb.entries_for(target.kb_source_name()).is_empty());
    assert_eq!(h.kb.entries_for(survivor.kb_source_name()).len(), 1);

    let deleted = h.events_named(NotificationEvent::WorkspaceSourceDeleted);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].target, NotificationTarget::group(&workspace.id));
    let payload: Workspace = serde_json::from_value(deleted[0].payload.clone()).unwrap();
    assert_eq!(payload.sources.len(), 1);
}

#[tokio::test]
async fn test_delete_source_index_out_of_range() {
    let h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf"]).await;

    let err = h
        .orchestrator
        .start_delete_source(&workspace.id, 3)
        .await
        .unwrap_err();
    assert!(matches!(err, atrium_core::Error::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn test_poll_ceiling_fails_provision_with_timeout() {
    let kb = ScriptedKnowledgeBase::new().with_poll_states(vec![OperationState::Running]);
    let mut h = Harness::with_policy(kb, PollPolicy::default(), MemoryWorkflowRepository::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf", "b.pdf"]).await;

    let started = tokio::time::Instant::now();
    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);

    assert_eq!(h.kb.status_call_count(), 20);
    assert!(started.elapsed() >= Duration::from_secs(60));

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.error_message.unwrap().contains("Timed out"));

    // Mid-provisioning state stays visible.
    let stored = h.workspace(&workspace.id).await.unwrap();
    assert_eq!(stored.status, WorkspaceStatus::Provisioning);
    assert!(stored
        .sources
        .iter()
        .all(|s| s.status == SourceStatus::Publishing));
    assert_eq!(h.kb.publish_count(), 0);
    assert!(h
        .events_named(NotificationEvent::WorkspaceDocumentsProvisioned)
        .is_empty());
}

#[tokio::test]
async fn test_failed_operation_fails_run_with_detail() {
    let kb = ScriptedKnowledgeBase::new()
        .with_poll_states(vec![OperationState::Running, OperationState::Failed])
        .with_failure_message("unsupported file type");
    let h = Harness::new(kb).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf"]).await;

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run
        .error_message
        .unwrap()
        .contains("unsupported file type"));
    assert_eq!(run.attempts, 1);
}

#[tokio::test]
async fn test_transient_submit_failure_is_retried() {
    let kb = ScriptedKnowledgeBase::new();
    kb.fail_next_submit("service unavailable");
    let h = Harness::new(kb).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf"]).await;

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 2);

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Completed);
    assert_eq!(run.attempts, 2);
    assert_eq!(
        h.workspace(&workspace.id).await.unwrap().status,
        WorkspaceStatus::Published
    );
}

#[tokio::test]
async fn test_retry_resumes_after_last_completed_activity() {
    let kb = ScriptedKnowledgeBase::new().with_poll_states(vec![
        OperationState::Running,
        OperationState::Running,
        OperationState::Running,
        OperationState::Succeeded,
    ]);
    let policy = PollPolicy::default()
        .with_interval(Duration::from_millis(10))
        .with_max_attempts(2);
    let h = Harness::with_policy(kb, policy, MemoryWorkflowRepository::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.create_workspace(&creator, &["a.pdf"]).await;

    let run_id = h.orchestrator.start_provision(&workspace).await.unwrap();
    h.worker.run_until_idle().await.unwrap();
    let run = h.workflows.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.checkpoint.is_done("update_kb_sources"));
    assert!(!run.checkpoint.is_done("await_sources"));

    h.kb.set_poll_states(vec![OperationState::Succeeded]);
    assert!(h.orchestrator.retry(run_id).await.unwrap());
    h.worker.run_until_idle().await.unwrap();

    let run = h.workflows.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Completed);
    let add_updates = h
        .kb
        .updates()
        .into_iter()
        .filter(|u| !u.add.is_empty())
        .count();
    assert_eq!(add_updates, 1);
    assert_eq!(
        h.workspace(&workspace.id).await.unwrap().status,
        WorkspaceStatus::Published
    );
}

#[tokio::test]
async fn test_delete_workspace_is_total_removal() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let member = h.seed_user("u2", "bo@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf", "b.pdf"]).await;
    h.orchestrator
        .mutator()
        .connect(&atrium_core::EntityRelation::new(
            member.reference(),
            workspace.reference(),
        ))
        .await
        .unwrap();
    for i in 0..3 {
        h.entities
            .upsert(&Note {
                id: format!("note-{}", i),
                workspace_id: workspace.id.clone(),
                author: creator.reference(),
                body: format!("note {}", i),
                icon: None,
                color: None,
                kb_entry_id: None,
                source: None,
                tags: vec![],
                importance: None,
                is_private: false,
                created_at: Utc::now(),
                comments: vec![],
                revision: 0,
            })
            .await
            .unwrap();
    }
    h.drain();

    let run_id = h
        .orchestrator
        .start_delete_workspace(&workspace.id)
        .await
        .unwrap();
    h.worker.run_until_idle().await.unwrap();
    assert_eq!(
        h.orchestrator.run(run_id).await.unwrap().unwrap().status,
        WorkflowStatus::Completed
    );

    assert!(h.workspace(&workspace.id).await.is_none());
    for id in ["u1", "u2"] {
        let user: User = h.entities.require(id).await.unwrap();
        assert!(!user.has_workspace(&workspace.id));
    }
    for i in 0..3 {
        let note: Option<Note> = h.entities.get(&format!("note-{}", i)).await.unwrap();
        assert!(note.is_none());
    }
    for source in &workspace.sources {
        assert!(!h.objects.exists(&source.storage_path).await.unwrap());
        assert!(h.kb.entries_for(source.kb_source_name()).is_empty());
    }

    let events = h.drain();
    let per_user: Vec<_> = events
        .iter()
        .filter(|n| n.event == NotificationEvent::WorkspaceDeletedForUser)
        .map(|n| n.target.clone())
        .collect();
    assert_eq!(
        per_user,
        vec![NotificationTarget::user("u1"), NotificationTarget::user("u2")]
    );
    assert_eq!(
        events
            .iter()
            .filter(|n| n.event == NotificationEvent::WorkspaceDeleted)
            .count(),
        1
    );

    // A second request finds nothing to delete.
    let err = h
        .orchestrator
        .start_delete_workspace(&workspace.id)
        .await
        .unwrap_err();
    assert!(matches!(err, atrium_core::Error::NotFound(_)));
}

#[tokio::test]
async fn test_delete_workspace_run_for_missing_workspace_fails_without_side_effects() {
    let h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let run_id = h
        .workflows
        .enqueue(
            atrium_core::WorkflowKind::DeleteWorkspace,
            "delete_workspace:gone",
            serde_json::json!({"workspace_id": "gone"}),
        )
        .await
        .unwrap();
    h.worker.run_until_idle().await.unwrap();

    let run = h.workflows.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.error_message.unwrap().contains("Not found"));
    assert!(h.kb.calls().is_empty());
}

#[tokio::test]
async fn test_delete_workspace_keeps_notes_of_other_workspaces() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf"]).await;
    let other = h.create_workspace(&creator, &[]).await;
    for (i, ws) in [&workspace, &workspace, &workspace, &other].iter().enumerate() {
        h.entities
            .upsert(&Note {
                id: format!("n{}", i),
                workspace_id: ws.id.clone(),
                author: creator.reference(),
                body: String::new(),
                icon: None,
                color: None,
                kb_entry_id: None,
                source: None,
                tags: vec![],
                importance: None,
                is_private: false,
                created_at: Utc::now(),
                comments: vec![],
                revision: 0,
            })
            .await
            .unwrap();
    }

    h.orchestrator
        .start_delete_workspace(&workspace.id)
        .await
        .unwrap();
    h.worker.run_until_idle().await.unwrap();

    for i in 0..3 {
        assert!(h.entities.get::<Note>(&format!("n{}", i)).await.unwrap().is_none());
    }
    assert!(h.entities.get::<Note>("n3").await.unwrap().is_some());
}
