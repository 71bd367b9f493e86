//! Entity store façade behavior over the document stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use atrium_db::test_fixtures::{memory_entity_store, test_database_url};
use atrium_db::{
    Database, Document, DocumentStore, EntityKind, EntityQuery, EntityRegistry, EntityStore,
    Error, GenericRef, MemoryDocumentStore, Note, Result, SortDirection, User, Workspace,
};
use chrono::{Duration, Utc};

fn workspace(id: &str) -> Workspace {
    Workspace::new(id, "Research", "papers", GenericRef::new("u1", "Ada Lovelace"))
}

fn note(id: &str, workspace_id: &str, minutes_ago: i64) -> Note {
    Note {
        id: id.to_string(),
        workspace_id: workspace_id.to_string(),
        author: GenericRef::new("u1", "Ada Lovelace"),
        body: format!("note {}", id),
        icon: None,
        color: None,
        kb_entry_id: None,
        source: None,
        tags: vec![],
        importance: None,
        is_private: false,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        comments: vec![],
        revision: 0,
    }
}

#[tokio::test]
async fn test_upsert_assigns_revisions() {
    let (store, _) = memory_entity_store();
    let created = store.upsert(&workspace("ws-1")).await.unwrap();
    assert_eq!(created.revision, 1);

    let mut edited = created.clone();
    edited.name = "Research 2".to_string();
    let stored = store.upsert(&edited).await.unwrap();
    assert_eq!(stored.revision, 2);

    let loaded: Workspace = store.require("ws-1").await.unwrap();
    assert_eq!(loaded.name, "Research 2");
    assert_eq!(loaded.revision, 2);
}

#[tokio::test]
async fn test_stale_write_is_conflict() {
    let (store, _) = memory_entity_store();
    let created = store.upsert(&workspace("ws-1")).await.unwrap();
    store.upsert(&created).await.unwrap();

    let err = store.upsert(&created).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_require_missing_is_not_found() {
    let (store, _) = memory_entity_store();
    let err = store.require::<User>("nobody").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

/// Lets another writer land between the façade's read and its write, once.
struct InterleavingStore {
    inner: MemoryDocumentStore,
    interfered: AtomicBool,
}

#[async_trait]
impl DocumentStore for InterleavingStore {
    async fn get(&self, container: &str, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        self.inner.get(container, kind, id).await
    }

    async fn put(&self, container: &str, doc: Document) -> Result<i64> {
        if doc.revision > 0 && !self.interfered.swap(true, Ordering::SeqCst) {
            let mut current = self
                .inner
                .get(container, doc.kind, &doc.id)
                .await?
                .expect("document exists");
            let mut other: Workspace = serde_json::from_value(current.body.clone()).unwrap();
            other.add_member(GenericRef::new("u2", "Bo"));
            current.body = serde_json::to_value(&other).unwrap();
            self.inner.put(container, current).await?;
        }
        self.inner.put(container, doc).await
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

#[tokio::test]
async fn test_update_reapplies_delta_after_conflict() {
    let backend = Arc::new(InterleavingStore {
        inner: MemoryDocumentStore::new(),
        interfered: AtomicBool::new(false),
    });
    let store = EntityStore::new(backend, Arc::new(EntityRegistry::default()));
    store.upsert(&workspace("ws-1")).await.unwrap();

    let mut applied = 0;
    let updated: Workspace = store
        .update("ws-1", |ws: &mut Workspace| {
            applied += 1;
            Ok(ws.add_member(GenericRef::new("u3", "Cy")))
        })
        .await
        .unwrap();

    assert_eq!(applied, 2);
    assert!(updated.has_member("u2"));
    assert!(updated.has_member("u3"));
    assert_eq!(updated.revision, 3);
}

#[tokio::test]
async fn test_update_gives_up_after_retry_limit() {
    struct AlwaysConflicting(MemoryDocumentStore);

    #[async_trait]
    impl DocumentStore for AlwaysConflicting {
        async fn get(&self, c: &str, k: EntityKind, id: &str) -> Result<Option<Document>> {
            self.0.get(c, k, id).await
        }
        async fn put(&self, c: &str, doc: Document) -> Result<i64> {
            if doc.revision > 0 {
                return Err(Error::Conflict("always".into()));
            }
            self.0.put(c, doc).await
        }
        async fn remove(&self, c: &str, k: EntityKind, id: &str) -> Result<bool> {
            self.0.remove(c, k, id).await
        }
        async fn query(&self, c: &str, k: EntityKind, q: &EntityQuery) -> Result<Vec<Document>> {
            self.0.query(c, k, q).await
        }
    }

    let store = EntityStore::new(
        Arc::new(AlwaysConflicting(MemoryDocumentStore::new())),
        Arc::new(EntityRegistry::default()),
    )
    .with_retry_limit(3);
    store.upsert(&workspace("ws-1")).await.unwrap();

    let mut applied = 0;
    let err = store
        .update("ws-1", |ws: &mut Workspace| {
            applied += 1;
            Ok(ws.add_member(GenericRef::new("u3", "Cy")))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(applied, 3);
}

#[tokio::test]
async fn test_update_without_change_skips_write() {
    let (store, _) = memory_entity_store();
    store.upsert(&workspace("ws-1")).await.unwrap();
    let unchanged: Workspace = store.update("ws-1", |_: &mut Workspace| Ok(false)).await.unwrap();
    assert_eq!(unchanged.revision, 1);
}

#[tokio::test]
async fn test_query_notes_by_workspace_newest_first() {
    let (store, _) = memory_entity_store();
    store.upsert(&note("n-old", "ws-1", 30)).await.unwrap();
    store.upsert(&note("n-new", "ws-1", 1)).await.unwrap();
    store.upsert(&note("n-other", "ws-2", 5)).await.unwrap();

    let notes: Vec<Note> = store
        .query(
            &EntityQuery::new()
                .filter("workspace_id", "ws-1")
                .sort_by("created_at", SortDirection::Desc),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n-new", "n-old"]);
}

#[tokio::test]
async fn test_kinds_share_namespace_without_collisions() {
    let (store, documents) = memory_entity_store();
    store.upsert(&workspace("same-id")).await.unwrap();
    store.upsert(&note("same-id", "ws-1", 0)).await.unwrap();
    assert_eq!(documents.len().await, 2);

    assert!(store.delete::<Note>("same-id").await.unwrap());
    assert!(store.get::<Workspace>("same-id").await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_postgres_document_store_round_trip() {
    let db = Database::connect(&test_database_url()).await.unwrap();
    db.migrate().await.unwrap();
    let store = EntityStore::new(
        Arc::new(db.documents.clone()),
        Arc::new(EntityRegistry::with_default_container("it")),
    );

    let id = atrium_db::new_entity_id();
    let created = store.upsert(&workspace(&id)).await.unwrap();
    assert_eq!(created.revision, 1);
    let err = store.upsert(&workspace(&id)).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let updated: Workspace = store
        .update(&id, |ws: &mut Workspace| {
            Ok(ws.add_member(GenericRef::new("u2", "Bo")))
        })
        .await
        .unwrap();
    assert_eq!(updated.revision, 2);
    assert!(store.delete::<Workspace>(&id).await.unwrap());
}
