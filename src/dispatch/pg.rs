use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::CorrectionJob;
use crate::db::types::JobStatus;

use super::{DispatchError, TaskDispatcher, TaskStatus};

const JOB_COLUMNS: &str = "\
    id, essay_id, status, attempts, max_attempts, last_error, queued_at, \
    started_at, finished_at, updated_at";

/// Postgres-backed job queue. Delivery is at-least-once: a job stays
/// `running` until the worker acknowledges it, and a crashed worker's job is
/// requeued by the timeout sweep.
#[derive(Clone)]
pub(crate) struct PgJobQueue {
    pool: PgPool,
    max_attempts: i32,
}

impl PgJobQueue {
    pub(crate) fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self { pool, max_attempts: max_attempts.max(1) as i32 }
    }

    /// Claim the oldest queued job, marking it running. Concurrent workers
    /// skip rows another claim transaction holds.
    pub(crate) async fn claim_next(&self) -> Result<Option<CorrectionJob>, DispatchError> {
        let job = sqlx::query_as::<_, CorrectionJob>(&format!(
            "WITH candidate AS (
                SELECT id
                FROM correction_jobs
                WHERE status = $1
                ORDER BY queued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE correction_jobs
            SET status = $2,
                attempts = correction_jobs.attempts + 1,
                started_at = $3,
                updated_at = $3
            FROM candidate
            WHERE correction_jobs.id = candidate.id
            RETURNING {JOB_COLUMNS}"
        ))
        .bind(JobStatus::Queued)
        .bind(JobStatus::Running)
        .bind(primitive_now_utc())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Acknowledge a processed job. The correction may still have failed at
    /// the business level; queue-wise the delivery is done either way.
    pub(crate) async fn ack_success(&self, task_handle: &str) -> Result<bool, DispatchError> {
        self.finish(task_handle, JobStatus::Succeeded, None).await
    }

    pub(crate) async fn ack_failure(
        &self,
        task_handle: &str,
        error: &str,
    ) -> Result<bool, DispatchError> {
        self.finish(task_handle, JobStatus::Failed, Some(error)).await
    }

    /// Return an unprocessable delivery to the queue. After `max_attempts`
    /// claims the job is parked as dead instead of being retried forever.
    pub(crate) async fn nack(
        &self,
        task_handle: &str,
        error: &str,
    ) -> Result<Option<JobStatus>, DispatchError> {
        let now = primitive_now_utc();
        let status = sqlx::query_scalar::<_, JobStatus>(
            "UPDATE correction_jobs
             SET status = CASE WHEN attempts >= max_attempts THEN $2 ELSE $3 END,
                 last_error = $4,
                 started_at = NULL,
                 finished_at = CASE WHEN attempts >= max_attempts THEN $5 ELSE NULL END,
                 updated_at = $5
             WHERE id = $1 AND status = $6
             RETURNING status",
        )
        .bind(task_handle)
        .bind(JobStatus::Dead)
        .bind(JobStatus::Queued)
        .bind(error)
        .bind(now)
        .bind(JobStatus::Running)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    /// Requeue jobs whose worker went away without acknowledging. This is
    /// the backstop above the scoring call's own hard timeout.
    pub(crate) async fn requeue_timed_out(
        &self,
        started_before: PrimitiveDateTime,
    ) -> Result<Vec<String>, DispatchError> {
        let now = primitive_now_utc();
        let requeued = sqlx::query_scalar::<_, String>(
            "UPDATE correction_jobs
             SET status = CASE WHEN attempts >= max_attempts THEN $2 ELSE $3 END,
                 last_error = $4,
                 started_at = NULL,
                 finished_at = CASE WHEN attempts >= max_attempts THEN $5 ELSE NULL END,
                 updated_at = $5
             WHERE status = $1 AND started_at IS NOT NULL AND started_at < $6
             RETURNING id",
        )
        .bind(JobStatus::Running)
        .bind(JobStatus::Dead)
        .bind(JobStatus::Queued)
        .bind("Job timed out while running; worker never acknowledged")
        .bind(now)
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(requeued)
    }

    async fn finish(
        &self,
        task_handle: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<bool, DispatchError> {
        let now = primitive_now_utc();
        let updated = sqlx::query(
            "UPDATE correction_jobs
             SET status = $2,
                 last_error = COALESCE($3, last_error),
                 finished_at = $4,
                 updated_at = $4
             WHERE id = $1 AND status = $5",
        )
        .bind(task_handle)
        .bind(status)
        .bind(error)
        .bind(now)
        .bind(JobStatus::Running)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskDispatcher for PgJobQueue {
    async fn enqueue(&self, essay_id: i64) -> Result<String, DispatchError> {
        let task_handle = Uuid::new_v4().to_string();
        let now = primitive_now_utc();

        sqlx::query(
            "INSERT INTO correction_jobs (id, essay_id, status, attempts, max_attempts, queued_at, updated_at)
             VALUES ($1, $2, $3, 0, $4, $5, $5)",
        )
        .bind(&task_handle)
        .bind(essay_id)
        .bind(JobStatus::Queued)
        .bind(self.max_attempts)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(task_handle)
    }

    async fn status(&self, task_handle: &str) -> Result<TaskStatus, DispatchError> {
        let status = sqlx::query_scalar::<_, JobStatus>(
            "SELECT status FROM correction_jobs WHERE id = $1",
        )
        .bind(task_handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.map(TaskStatus::from).unwrap_or(TaskStatus::Unknown))
    }

    async fn cancel(&self, task_handle: &str) -> Result<bool, DispatchError> {
        let now = primitive_now_utc();
        let cancelled = sqlx::query(
            "UPDATE correction_jobs
             SET status = $2, finished_at = $3, updated_at = $3
             WHERE id = $1 AND status = $4",
        )
        .bind(task_handle)
        .bind(JobStatus::Cancelled)
        .bind(now)
        .bind(JobStatus::Queued)
        .execute(&self.pool)
        .await?;

        Ok(cancelled.rows_affected() > 0)
    }
}
