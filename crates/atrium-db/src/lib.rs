//! # atrium-db
//!
//! Storage layer for atrium.
//!
//! This crate provides:
//! - Connection pool management
//! - A JSONB document store holding every entity kind, with revision
//!   compare-and-swap writes
//! - The durable workflow run repository
//! - In-memory equivalents of both for tests and development
//! - Filesystem and in-memory object stores with signed read URLs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use atrium_db::{Database, EntityRegistry, EntityStore, Workspace};
//!
//! let db = Database::connect("postgres://localhost/atrium").await?;
//! db.migrate().await?;
//! let entities = EntityStore::new(Arc::new(db.documents.clone()), Arc::new(EntityRegistry::from_env()));
//! let workspace: Option<Workspace> = entities.get("019508a0-...").await?;
//! ```

pub mod blob_storage;
pub mod documents;
pub mod memory;
pub mod pool;
pub mod test_fixtures;
pub mod workflows;

// Re-export core types
pub use atrium_core::*;

pub use blob_storage::{FilesystemObjectStore, MemoryObjectStore, UrlSigner};
pub use documents::PgDocumentStore;
pub use memory::{MemoryDocumentStore, MemoryWorkflowRepository};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use workflows::PgWorkflowRepository;

/// PostgreSQL-backed repositories sharing one pool.
pub struct Database {
    pool: sqlx::Pool<sqlx::Postgres>,
    /// Entity documents.
    pub documents: PgDocumentStore,
    /// Durable workflow runs.
    pub workflows: PgWorkflowRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentStore::new(pool.clone()),
            workflows: PgWorkflowRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
