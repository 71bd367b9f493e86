//! Shared harness: in-memory stores, scripted knowledge base and a captured
//! notification stream wired into one orchestrator and worker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use atrium_core::{
    ContentSource, Document, DocumentStore, EntityKind, EntityQuery, EntityRegistry,
    EntityRelation, EntityStore, Error, Identity, Member, NotificationEnvelope,
    NotificationEvent, NotificationHub, ObjectStore, Result, SourceStatus, User, Workspace,
};
use atrium_db::test_fixtures::memory_object_store;
use atrium_db::{MemoryDocumentStore, MemoryObjectStore, MemoryWorkflowRepository};
use atrium_jobs::{
    OrchestratorConfig, OrchestratorDeps, PollPolicy, WorkerBuilder, WorkflowWorker,
    WorkspaceOrchestrator,
};
use atrium_kb::mock::ScriptedKnowledgeBase;

pub const KB_ID: &str = "kb-test";

pub struct Harness {
    pub entities: EntityStore,
    pub objects: Arc<MemoryObjectStore>,
    pub kb: ScriptedKnowledgeBase,
    pub hub: NotificationHub,
    pub notifications: broadcast::Receiver<NotificationEnvelope>,
    pub workflows: MemoryWorkflowRepository,
    pub orchestrator: WorkspaceOrchestrator,
    pub worker: WorkflowWorker,
}

impl Harness {
    /// Polls every 10ms so tests stay fast.
    pub async fn new(kb: ScriptedKnowledgeBase) -> Self {
        let policy = PollPolicy::default().with_interval(Duration::from_millis(10));
        Self::with_policy(kb, policy, MemoryWorkflowRepository::new()).await
    }

    pub async fn with_policy(
        kb: ScriptedKnowledgeBase,
        policy: PollPolicy,
        workflows: MemoryWorkflowRepository,
    ) -> Self {
        Self::with_documents(kb, policy, workflows, Arc::new(MemoryDocumentStore::new())).await
    }

    /// Harness over fast polling and the given document store.
    pub async fn over_documents(documents: Arc<dyn DocumentStore>) -> Self {
        let policy = PollPolicy::default().with_interval(Duration::from_millis(10));
        Self::with_documents(
            ScriptedKnowledgeBase::new(),
            policy,
            MemoryWorkflowRepository::new(),
            documents,
        )
        .await
    }

    pub async fn with_documents(
        kb: ScriptedKnowledgeBase,
        policy: PollPolicy,
        workflows: MemoryWorkflowRepository,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let entities = EntityStore::new(documents, Arc::new(EntityRegistry::default()));
        let objects = Arc::new(memory_object_store());
        let hub = NotificationHub::new(256);
        let notifications = hub.subscribe();

        let deps = OrchestratorDeps {
            entities: entities.clone(),
            objects: objects.clone(),
            kb: Arc::new(kb.clone()),
            publisher: Arc::new(hub.clone()),
            workflows: Arc::new(workflows.clone()),
        };
        let orchestrator =
            WorkspaceOrchestrator::new(deps, OrchestratorConfig::new(KB_ID).with_poll(policy));
        let worker = WorkerBuilder::new(Arc::new(workflows.clone()))
            .with_handlers(orchestrator.handlers())
            .build()
            .await;

        Self {
            entities,
            objects,
            kb,
            hub,
            notifications,
            workflows,
            orchestrator,
            worker,
        }
    }

    pub async fn seed_user(&self, id: &str, email: &str) -> User {
        let identity = identity(id, email);
        self.entities
            .upsert(&User::from_identity(&identity))
            .await
            .unwrap()
    }

    /// Store a blob and describe it as a `Publishing` source.
    pub async fn upload(&self, workspace_id: &str, file_name: &str, added_by: &str) -> ContentSource {
        let path = format!(
            "workspaces/{}/sources/{}.pdf",
            workspace_id,
            uuid::Uuid::new_v4()
        );
        self.objects
            .put(&path, b"%PDF-1.7 test", "application/pdf")
            .await
            .unwrap();
        ContentSource {
            display_name: file_name.to_string(),
            original_file_name: file_name.to_string(),
            storage_path: path,
            added_by_id: added_by.to_string(),
            added_at: Utc::now(),
            status: SourceStatus::Publishing,
        }
    }

    /// A `Provisioning` workspace with uploaded sources and the creator
    /// connected on both sides.
    pub async fn create_workspace(&self, creator: &User, files: &[&str]) -> Workspace {
        let id = atrium_core::new_entity_id();
        let mut workspace = Workspace::new(id.clone(), "Research", "", creator.reference());
        for file in files {
            let source = self.upload(&id, file, &creator.id).await;
            workspace.sources.push(source);
        }
        workspace.members.push(Member {
            user: creator.reference(),
            joined_at: Utc::now(),
        });
        let workspace = self.entities.upsert(&workspace).await.unwrap();
        self.orchestrator
            .mutator()
            .connect(&EntityRelation::new(
                creator.reference(),
                workspace.reference(),
            ))
            .await
            .unwrap();
        self.entities.require(&workspace.id).await.unwrap()
    }

    /// Create a workspace and run provisioning to completion.
    pub async fn published_workspace(&mut self, creator: &User, files: &[&str]) -> Workspace {
        let workspace = self.create_workspace(creator, files).await;
        self.orchestrator.start_provision(&workspace).await.unwrap();
        self.worker.run_until_idle().await.unwrap();
        self.drain();
        self.entities.require(&workspace.id).await.unwrap()
    }

    /// Notifications published since the last drain.
    pub fn drain(&mut self) -> Vec<NotificationEnvelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.notifications.try_recv() {
            out.push(envelope);
        }
        out
    }

    pub fn events_named(&mut self, event: NotificationEvent) -> Vec<NotificationEnvelope> {
        self.drain().into_iter().filter(|n| n.event == event).collect()
    }

    pub async fn workspace(&self, id: &str) -> Option<Workspace> {
        self.entities.get(id).await.unwrap()
    }
}

/// Document store that can interrupt the next write of one kind.
#[derive(Default)]
pub struct InterruptingDocuments {
    inner: MemoryDocumentStore,
    fail_next: Mutex<Option<EntityKind>>,
    delete_after_user_write: Mutex<Option<String>>,
}

impl InterruptingDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write of `kind` fails with a transient error.
    pub fn fail_next_put(&self, kind: EntityKind) {
        *self.fail_next.lock().unwrap() = Some(kind);
    }

    /// After the next user write, flag `workspace_id` as being deleted, as a
    /// concurrent delete would.
    pub fn start_delete_after_user_write(&self, workspace_id: &str) {
        *self.delete_after_user_write.lock().unwrap() = Some(workspace_id.to_string());
    }
}

#[async_trait]
impl DocumentStore for InterruptingDocuments {
    async fn get(&self, container: &str, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        self.inner.get(container, kind, id).await
    }

    async fn put(&self, container: &str, doc: Document) -> Result<i64> {
        let fail = {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next == Some(doc.kind) {
                fail_next.take();
                true
            } else {
                false
            }
        };
        if fail {
            return Err(Error::External("503 service unavailable".to_string()));
        }

        let kind = doc.kind;
        let revision = self.inner.put(container, doc).await?;
        if kind == EntityKind::User {
            let target = self.delete_after_user_write.lock().unwrap().take();
            if let Some(workspace_id) = target {
                if let Some(mut ws) = self
                    .inner
                    .get(container, EntityKind::Workspace, &workspace_id)
                    .await?
                {
                    ws.body["status"] = "deleting".into();
                    self.inner.put(container, ws).await?;
                }
            }
        }
        Ok(revision)
    }

    async fn remove(&self, container: &str, kind: EntityKind, id: &str) -> Result<bool> {
        self.inner.remove(container, kind, id).await
    }

    async fn query(
        &self,
        container: &str,
        kind: EntityKind,
        query: &EntityQuery,
    ) -> Result<Vec<Document>> {
        self.inner.query(container, kind, query).await
    }
}

pub fn identity(id: &str, email: &str) -> Identity {
    Identity {
        id: id.to_string(),
        email: email.to_string(),
        first_name: id.to_uppercase(),
        last_name: "Tester".to_string(),
    }
}
