//! Workflow run repository implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use atrium_core::{
    defaults, new_v7, Error, Result, WorkflowCheckpoint, WorkflowKind, WorkflowRepository,
    WorkflowRun, WorkflowStats, WorkflowStatus,
};

const RUN_COLUMNS: &str = "id, kind, instance_key, status::text AS status, input, checkpoint,
    error_message, attempts, max_attempts, created_at, started_at, completed_at";

/// PostgreSQL implementation of WorkflowRepository.
pub struct PgWorkflowRepository {
    pool: Pool<Postgres>,
    /// Signalled whenever a run becomes pending, so idle workers wake early.
    notify: Arc<Notify>,
    max_attempts: i32,
}

impl PgWorkflowRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
            max_attempts: defaults::WORKFLOW_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn run_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_run_row(row: sqlx::postgres::PgRow) -> Result<WorkflowRun> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let checkpoint: JsonValue = row.get("checkpoint");
        Ok(WorkflowRun {
            id: row.get("id"),
            kind: kind.parse()?,
            instance_key: row.get("instance_key"),
            status: status.parse()?,
            input: row.get("input"),
            checkpoint: serde_json::from_value(checkpoint)?,
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn enqueue(
        &self,
        kind: WorkflowKind,
        instance_key: &str,
        input: JsonValue,
    ) -> Result<Uuid> {
        // The partial unique index on instance_key makes this atomic against
        // concurrent enqueues of the same instance.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO workflow_run (id, kind, instance_key, status, input, max_attempts, created_at)
             VALUES ($1, $2, $3, 'pending'::workflow_status, $4, $5, $6)
             ON CONFLICT (instance_key) WHERE status IN ('pending', 'running') DO NOTHING
             RETURNING id",
        )
        .bind(new_v7())
        .bind(kind.as_str())
        .bind(instance_key)
        .bind(&input)
        .bind(self.max_attempts)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(id) = inserted {
            self.notify.notify_waiters();
            return Ok(id);
        }

        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM workflow_run
             WHERE instance_key = $1 AND status IN ('pending'::workflow_status, 'running'::workflow_status)",
        )
        .bind(instance_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| {
            Error::Workflow(format!(
                "instance {} neither inserted nor active",
                instance_key
            ))
        })
    }

    async fn claim_next(&self, kinds: &[WorkflowKind]) -> Result<Option<WorkflowRun>> {
        let kind_strings: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();

        let sql = format!(
            "UPDATE workflow_run
             SET status = 'running'::workflow_status, started_at = $1, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM workflow_run
                 WHERE status = 'pending'::workflow_status
                   AND (cardinality($2::text[]) = 0 OR kind = ANY($2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {RUN_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(&kind_strings)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_run_row).transpose()
    }

    async fn save_checkpoint(&self, run_id: Uuid, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        sqlx::query("UPDATE workflow_run SET checkpoint = $1 WHERE id = $2")
            .bind(serde_json::to_value(checkpoint)?)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(&self, run_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_run
             SET status = 'completed'::workflow_status, completed_at = $1, error_message = NULL
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, run_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (attempts, max_attempts): (i32, i32) = sqlx::query_as(
            "SELECT attempts, max_attempts FROM workflow_run WHERE id = $1 FOR UPDATE",
        )
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let requeue = retryable && attempts < max_attempts;
        if requeue {
            sqlx::query(
                "UPDATE workflow_run
                 SET status = 'pending'::workflow_status, error_message = $1, started_at = NULL
                 WHERE id = $2",
            )
            .bind(error)
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            sqlx::query(
                "UPDATE workflow_run
                 SET status = 'failed'::workflow_status, completed_at = $1, error_message = $2
                 WHERE id = $3",
            )
            .bind(Utc::now())
            .bind(error)
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn retry(&self, run_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workflow_run r
             SET status = 'pending'::workflow_status, attempts = 0,
                 started_at = NULL, completed_at = NULL
             WHERE r.id = $1
               AND r.status = 'failed'::workflow_status
               AND NOT EXISTS (
                   SELECT 1 FROM workflow_run o
                   WHERE o.instance_key = r.instance_key AND o.id <> r.id
                     AND o.status IN ('pending'::workflow_status, 'running'::workflow_status)
               )",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE workflow_run
             SET status = 'pending'::workflow_status, started_at = NULL
             WHERE status = 'running'::workflow_status
               AND (started_at IS NULL OR started_at <= $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let count = result.rows_affected();
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM workflow_run WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_run_row).transpose()
    }

    async fn list_for_instance(&self, instance_key: &str) -> Result<Vec<WorkflowRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM workflow_run
             WHERE instance_key = $1
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(instance_key)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_run_row).collect()
    }

    async fn stats(&self) -> Result<WorkflowStats> {
        let rows = sqlx::query(
            "SELECT status::text AS status, COUNT(*) AS count FROM workflow_run GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut stats = WorkflowStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.parse::<WorkflowStatus>()? {
                WorkflowStatus::Pending => stats.pending = count,
                WorkflowStatus::Running => stats.running = count,
                WorkflowStatus::Completed => stats.completed = count,
                WorkflowStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
