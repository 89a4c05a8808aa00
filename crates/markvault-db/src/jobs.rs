//! Maintenance job queue repository.
//!
//! Retention pruning and orphan repair run as persisted jobs so cleanup
//! work survives process restarts. Claims use `FOR UPDATE SKIP LOCKED` so
//! multiple workers never double-process a job.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use markvault_core::{
    defaults, Error, Job, JobRepository, JobStatus, JobType, QueueStats, Result,
};

/// PostgreSQL implementation of the maintenance JobRepository.
#[derive(Clone)]
pub struct PgSnapshotJobRepository {
    pool: PgPool,
}

impl PgSnapshotJobRepository {
    /// Create a new job repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert JobType to string for database.
    fn job_type_to_str(job_type: JobType) -> &'static str {
        match job_type {
            JobType::RetentionPrune => "retention_prune",
            JobType::OrphanRepair => "orphan_repair",
        }
    }

    /// Convert string from database to JobType.
    fn str_to_job_type(s: &str) -> JobType {
        match s {
            "retention_prune" => JobType::RetentionPrune,
            "orphan_repair" => JobType::OrphanRepair,
            _ => JobType::OrphanRepair, // fallback
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending, // fallback
        }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            bookmark_id: row.get("bookmark_id"),
            job_type: Self::str_to_job_type(row.get("job_type")),
            status: Self::str_to_job_status(row.get("status")),
            priority: row.get("priority"),
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }
}

#[async_trait]
impl JobRepository for PgSnapshotJobRepository {
    async fn queue(
        &self,
        bookmark_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let job_id = Uuid::now_v7();

        sqlx::query(
            r#"INSERT INTO snapshot_job
               (id, bookmark_id, job_type, status, priority, payload, retry_count, max_retries, created_at)
               VALUES ($1, $2, $3, 'pending', $4, $5, 0, $6, $7)"#,
        )
        .bind(job_id)
        .bind(bookmark_id)
        .bind(Self::job_type_to_str(job_type))
        .bind(priority)
        .bind(&payload)
        .bind(defaults::JOB_MAX_RETRIES)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn queue_deduplicated(
        &self,
        bookmark_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Option<Uuid>> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"SELECT id FROM snapshot_job
               WHERE job_type = $1 AND status = 'pending'
                 AND bookmark_id IS NOT DISTINCT FROM $2
               LIMIT 1"#,
        )
        .bind(Self::job_type_to_str(job_type))
        .bind(bookmark_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if existing.is_some() {
            return Ok(None);
        }

        let id = self.queue(bookmark_id, job_type, priority, payload).await?;
        Ok(Some(id))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        // FOR UPDATE SKIP LOCKED lets concurrent workers claim disjoint
        // jobs without blocking each other.
        let row = sqlx::query(
            r#"UPDATE snapshot_job
               SET status = 'running', started_at = NOW()
               WHERE id = (
                   SELECT id FROM snapshot_job
                   WHERE status = 'pending'
                   ORDER BY priority DESC, created_at ASC
                   LIMIT 1
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING id, bookmark_id, job_type, status, priority, payload,
                         error_message, retry_count, max_retries,
                         created_at, started_at, completed_at"#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        sqlx::query(
            r#"UPDATE snapshot_job
               SET status = 'completed', payload = COALESCE($2, payload), completed_at = NOW()
               WHERE id = $1"#,
        )
        .bind(job_id)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        // Re-queue while retries remain, otherwise mark failed for good.
        sqlx::query(
            r#"UPDATE snapshot_job
               SET retry_count = retry_count + 1,
                   error_message = $2,
                   status = CASE WHEN retry_count + 1 >= max_retries
                                 THEN 'failed' ELSE 'pending' END,
                   completed_at = CASE WHEN retry_count + 1 >= max_retries
                                       THEN NOW() ELSE NULL END,
                   started_at = NULL
               WHERE id = $1"#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"SELECT
                 COUNT(*) FILTER (WHERE status = 'pending')   AS pending,
                 COUNT(*) FILTER (WHERE status = 'running')   AS running,
                 COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                 COUNT(*) FILTER (WHERE status = 'failed')    AS failed
               FROM snapshot_job"#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get("pending"),
            running: row.get("running"),
            completed: row.get("completed"),
            failed: row.get("failed"),
        })
    }
}
