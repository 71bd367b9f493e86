//! Typed entity store façade.
//!
//! Entities of every kind share one partitioned document namespace. Each kind
//! has an explicit descriptor in an [`EntityRegistry`] built once at startup
//! and passed by reference into the [`EntityStore`]; there is no process-wide
//! mutable type map.
//!
//! Writes are conditional on the entity's `revision`:
//!
//! - revision `0` inserts and fails with [`Error::Conflict`] if the id exists
//! - any other revision must equal the stored revision
//!
//! [`EntityStore::update`] wraps this in a re-read-and-reapply loop so
//! concurrent workflow instances never silently discard each other's edits.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::defaults;
use crate::traits::DocumentStore;
use crate::{Error, Result};

// =============================================================================
// KINDS AND DESCRIPTORS
// =============================================================================

/// Discriminator for entity kinds sharing the document namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    User,
    Invitation,
    Note,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Workspace,
        EntityKind::User,
        EntityKind::Invitation,
        EntityKind::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::User => "user",
            EntityKind::Invitation => "invitation",
            EntityKind::Note => "note",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity kind: {}", s)))
    }
}

/// A persisted entity type.
///
/// The partition key accessor is part of the type's own impl, so no runtime
/// introspection is needed to route a write.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn partition_key(&self) -> &str;
    fn revision(&self) -> i64;
    fn set_revision(&mut self, revision: i64);
}

/// Where an entity kind is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub container: String,
}

/// Lookup table of entity descriptors, one per kind.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    descriptors: HashMap<EntityKind, EntityDescriptor>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::with_default_container(defaults::ENTITY_CONTAINER)
    }
}

impl EntityRegistry {
    /// Registers every kind in the same container.
    pub fn with_default_container(container: &str) -> Self {
        let descriptors = EntityKind::ALL
            .iter()
            .map(|&kind| {
                (
                    kind,
                    EntityDescriptor {
                        kind,
                        container: container.to_string(),
                    },
                )
            })
            .collect();
        Self { descriptors }
    }

    /// Overrides the container of one kind.
    pub fn with_container(mut self, kind: EntityKind, container: impl Into<String>) -> Self {
        self.descriptors.insert(
            kind,
            EntityDescriptor {
                kind,
                container: container.into(),
            },
        );
        self
    }

    /// Build from environment variables.
    ///
    /// - `ENTITY_CONTAINER`: container for all kinds (default "core")
    /// - `ENTITY_CONTAINER_<KIND>`: per-kind override, e.g. `ENTITY_CONTAINER_NOTE`
    pub fn from_env() -> Self {
        let default_container = std::env::var("ENTITY_CONTAINER")
            .unwrap_or_else(|_| defaults::ENTITY_CONTAINER.to_string());
        let mut registry = Self::with_default_container(&default_container);
        for kind in EntityKind::ALL {
            let key = format!("ENTITY_CONTAINER_{}", kind.as_str().to_ascii_uppercase());
            if let Ok(container) = std::env::var(&key) {
                registry = registry.with_container(kind, container);
            }
        }
        registry
    }

    pub fn descriptor(&self, kind: EntityKind) -> &EntityDescriptor {
        // Every constructor registers all kinds.
        &self.descriptors[&kind]
    }

    pub fn container(&self, kind: EntityKind) -> &str {
        &self.descriptor(kind).container
    }
}

// =============================================================================
// RAW DOCUMENTS AND QUERIES
// =============================================================================

/// Serialized entity as exchanged with a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub kind: EntityKind,
    pub id: String,
    pub partition_key: String,
    /// Expected stored revision on write; stored revision on read.
    pub revision: i64,
    pub body: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Equality predicate on a top-level JSON field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub field: String,
    pub value: JsonValue,
}

/// Filtered, sorted, paged query over one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub predicates: Vec<FieldPredicate>,
    pub sort_key: Option<String>,
    pub sort_direction: SortDirection,
    pub offset: i64,
    pub limit: i64,
}

impl Default for EntityQuery {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            sort_key: None,
            sort_direction: SortDirection::Asc,
            offset: 0,
            limit: defaults::NOTE_LIST_LIMIT,
        }
    }
}

impl EntityQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.predicates.push(FieldPredicate {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_key = Some(key.into());
        self.sort_direction = direction;
        self
    }

    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset.max(0);
        self.limit = limit.max(0);
        self
    }

    /// Whether a document body satisfies every predicate.
    pub fn matches(&self, body: &JsonValue) -> bool {
        self.predicates
            .iter()
            .all(|p| body.get(&p.field) == Some(&p.value))
    }
}

// =============================================================================
// TYPED FAÇADE
// =============================================================================

/// Typed CRUD and query façade over a [`DocumentStore`].
#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn DocumentStore>,
    registry: Arc<EntityRegistry>,
    retry_limit: u32,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn DocumentStore>, registry: Arc<EntityRegistry>) -> Self {
        Self {
            backend,
            registry,
            retry_limit: defaults::REVISION_RETRY_LIMIT,
        }
    }

    /// Set how many times [`update`](Self::update) re-reads after a conflict.
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    fn container<T: Entity>(&self) -> &str {
        self.registry.container(T::KIND)
    }

    fn decode<T: Entity>(doc: Document) -> Result<T> {
        let mut entity: T = serde_json::from_value(doc.body)?;
        entity.set_revision(doc.revision);
        Ok(entity)
    }

    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        match self.backend.get(self.container::<T>(), T::KIND, id).await? {
            Some(doc) => Ok(Some(Self::decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but absence is [`Error::NotFound`].
    pub async fn require<T: Entity>(&self, id: &str) -> Result<T> {
        self.get::<T>(id)
            .await?
            .ok_or_else(|| Error::not_found(T::KIND.as_str(), id))
    }

    /// Conditionally write the entity; returns it with the new revision.
    pub async fn upsert<T: Entity>(&self, entity: &T) -> Result<T> {
        let doc = Document {
            kind: T::KIND,
            id: entity.id().to_string(),
            partition_key: entity.partition_key().to_string(),
            revision: entity.revision(),
            body: serde_json::to_value(entity)?,
        };
        let revision = self.backend.put(self.container::<T>(), doc).await?;
        let mut stored = entity.clone();
        stored.set_revision(revision);
        debug!(
            subsystem = "core",
            component = "entity_store",
            op = "upsert",
            entity_kind = T::KIND.as_str(),
            id = entity.id(),
            revision,
            "Entity written"
        );
        Ok(stored)
    }

    /// Delete by id. Returns whether a record was removed.
    pub async fn delete<T: Entity>(&self, id: &str) -> Result<bool> {
        self.backend.remove(self.container::<T>(), T::KIND, id).await
    }

    pub async fn query<T: Entity>(&self, query: &EntityQuery) -> Result<Vec<T>> {
        let docs = self
            .backend
            .query(self.container::<T>(), T::KIND, query)
            .await?;
        docs.into_iter().map(Self::decode).collect()
    }

    pub async fn find_one<T: Entity>(&self, query: EntityQuery) -> Result<Option<T>> {
        let query = query.page(0, 1);
        Ok(self.query::<T>(&query).await?.into_iter().next())
    }

    /// Read-modify-write with conflict retry.
    ///
    /// `apply` mutates the freshest copy and returns whether anything changed;
    /// unchanged entities are returned without a write. On a revision conflict
    /// the entity is re-read and `apply` runs again.
    pub async fn update<T, F>(&self, id: &str, mut apply: F) -> Result<T>
    where
        T: Entity,
        F: FnMut(&mut T) -> Result<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut entity = self.require::<T>(id).await?;
            if !apply(&mut entity)? {
                return Ok(entity);
            }
            match self.upsert(&entity).await {
                Ok(stored) => return Ok(stored),
                Err(Error::Conflict(detail)) if attempt < self.retry_limit => {
                    warn!(
                        subsystem = "core",
                        component = "entity_store",
                        op = "update",
                        entity_kind = T::KIND.as_str(),
                        id,
                        attempt,
                        detail = %detail,
                        "Revision conflict, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
