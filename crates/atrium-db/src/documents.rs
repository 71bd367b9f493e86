//! PostgreSQL document store.
//!
//! Every entity kind lives in the `entity_document` table as a JSONB body
//! keyed by `(container, kind, id)`. Writes are compare-and-swap on the
//! `revision` column.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::{Pool, Postgres, Row};
use tracing::trace;

use atrium_core::{
    Document, DocumentStore, EntityKind, EntityQuery, Error, Result, SortDirection,
};

/// PostgreSQL implementation of DocumentStore.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool<Postgres>,
}

impl PgDocumentStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_document_row(row: sqlx::postgres::PgRow) -> Result<Document> {
        let kind: String = row.get("kind");
        Ok(Document {
            kind: kind.parse()?,
            id: row.get("id"),
            partition_key: row.get("partition_key"),
            revision: row.get("revision"),
            body: row.get("body"),
        })
    }

    /// Predicates folded into one JSON object for a `@>` containment test.
    fn predicate_object(query: &EntityQuery) -> JsonValue {
        let mut object = Map::new();
        for predicate in &query.predicates {
            object.insert(predicate.field.clone(), predicate.value.clone());
        }
        JsonValue::Object(object)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, container: &str, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT kind, id, partition_key, revision, body
             FROM entity_document
             WHERE container = $1 AND kind = $2 AND id = $3",
        )
        .bind(container)
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_document_row).transpose()
    }

    async fn put(&self, container: &str, doc: Document) -> Result<i64> {
        let revision = if doc.revision == 0 {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO entity_document (container, kind, id, partition_key, revision, body)
                 VALUES ($1, $2, $3, $4, 1, $5)
                 ON CONFLICT (container, kind, id) DO NOTHING
                 RETURNING revision",
            )
            .bind(container)
            .bind(doc.kind.as_str())
            .bind(&doc.id)
            .bind(&doc.partition_key)
            .bind(&doc.body)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
        } else {
            sqlx::query_scalar::<_, i64>(
                "UPDATE entity_document
                 SET body = $5, partition_key = $4, revision = revision + 1, updated_at = NOW()
                 WHERE container = $1 AND kind = $2 AND id = $3 AND revision = $6
                 RETURNING revision",
            )
            .bind(container)
            .bind(doc.kind.as_str())
            .bind(&doc.id)
            .bind(&doc.partition_key)
            .bind(&doc.body)
            .bind(doc.revision)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
        };

        revision.ok_or_else(|| {
            Error::Conflict(format!(
                "{} {} is not at revision {}",
                doc.kind, doc.id, doc.revision
            ))
        })
    }

    async fn remove(&self, container: &str, kind: EntityKind, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM entity_document WHERE container = $1 AND kind = $2 AND id = $3",
        )
        .bind(container)
        .bind(kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(
        &self,
        container: &str,
        kind: EntityKind,
        query: &EntityQuery,
    ) -> Result<Vec<Document>> {
        let direction = match query.sort_direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        // Sort key is bound as a parameter; only the direction is spliced in.
        let sql = format!(
            "SELECT kind, id, partition_key, revision, body
             FROM entity_document
             WHERE container = $1 AND kind = $2 AND body @> $3
             ORDER BY CASE WHEN $4::text IS NULL THEN NULL ELSE body->>$4 END {direction} NULLS LAST, id {direction}
             OFFSET $5 LIMIT $6"
        );

        let rows = sqlx::query(&sql)
            .bind(container)
            .bind(kind.as_str())
            .bind(Self::predicate_object(query))
            .bind(query.sort_key.as_deref())
            .bind(query.offset)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "documents",
            op = "query",
            entity_kind = kind.as_str(),
            result_count = rows.len(),
            "Document query"
        );

        rows.into_iter().map(Self::parse_document_row).collect()
    }
}
