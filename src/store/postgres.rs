use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Correction, Essay};
use crate::db::types::{CorrectionStatus, CorrectionType, EssayStatus};

use super::{
    CorrectionResultUpdate, CorrectionStore, EssayFilter, EssayPair, NewEssay, StoreError,
};

pub(crate) const ESSAY_COLUMNS: &str = "\
    id, user_id, title, content, word_count, grade, status, score, corrected_content, \
    comments, error_analysis, improvement_suggestions, error_message, version, \
    created_at, updated_at";

pub(crate) const CORRECTION_COLUMNS: &str = "\
    id, essay_id, status, correction_type, task_handle, results, score, comments, \
    error_analysis, improvement_suggestions, retry_count, error_message, version, \
    is_deleted, created_at, updated_at, completed_at";

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_correction(&self, essay_id: i64) -> Result<Option<Correction>, StoreError> {
        let correction = sqlx::query_as::<_, Correction>(&format!(
            "SELECT {CORRECTION_COLUMNS} FROM corrections
             WHERE essay_id = $1 AND NOT is_deleted"
        ))
        .bind(essay_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(correction)
    }

    async fn load_pairs(&self, essay_ids: Vec<i64>) -> Result<Vec<EssayPair>, StoreError> {
        let mut pairs = Vec::with_capacity(essay_ids.len());
        for essay_id in essay_ids {
            if let Some(pair) = self.fetch_pair(essay_id).await? {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }
}

#[async_trait]
impl CorrectionStore for PgStore {
    async fn create_pair(&self, new_essay: NewEssay) -> Result<EssayPair, StoreError> {
        let now = primitive_now_utc();
        let mut tx = self.pool.begin().await?;

        let essay = sqlx::query_as::<_, Essay>(&format!(
            "INSERT INTO essays (user_id, title, content, word_count, grade, status, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $7)
             RETURNING {ESSAY_COLUMNS}"
        ))
        .bind(&new_essay.user_id)
        .bind(&new_essay.title)
        .bind(&new_essay.content)
        .bind(new_essay.word_count)
        .bind(&new_essay.grade)
        .bind(EssayStatus::Pending)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let correction = sqlx::query_as::<_, Correction>(&format!(
            "INSERT INTO corrections (essay_id, status, correction_type, retry_count, version, is_deleted, created_at, updated_at)
             VALUES ($1, $2, $3, 0, 0, FALSE, $4, $4)
             RETURNING {CORRECTION_COLUMNS}"
        ))
        .bind(essay.id)
        .bind(CorrectionStatus::Pending)
        .bind(CorrectionType::Automated)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(EssayPair { essay, correction })
    }

    async fn fetch_pair(&self, essay_id: i64) -> Result<Option<EssayPair>, StoreError> {
        let essay = self.fetch_essay(essay_id).await?;
        let Some(essay) = essay else {
            return Ok(None);
        };

        let correction = self
            .load_correction(essay_id)
            .await?
            .ok_or(StoreError::CorrectionMissing(essay_id))?;

        Ok(Some(EssayPair { essay, correction }))
    }

    async fn fetch_essay(&self, essay_id: i64) -> Result<Option<Essay>, StoreError> {
        let essay = sqlx::query_as::<_, Essay>(&format!(
            "SELECT {ESSAY_COLUMNS} FROM essays WHERE id = $1"
        ))
        .bind(essay_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(essay)
    }

    async fn list_essays(&self, filter: EssayFilter) -> Result<Vec<Essay>, StoreError> {
        let essays = sqlx::query_as::<_, Essay>(&format!(
            "SELECT {ESSAY_COLUMNS} FROM essays
             WHERE ($1::text IS NULL OR user_id = $1)
               AND ($2::essaystatus IS NULL OR status = $2)
             ORDER BY created_at DESC
             OFFSET $3 LIMIT $4"
        ))
        .bind(&filter.user_id)
        .bind(filter.status)
        .bind(filter.skip.max(0))
        .bind(filter.limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;

        Ok(essays)
    }

    async fn attach_task_handle(
        &self,
        pair: &EssayPair,
        task_handle: &str,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE corrections
             SET task_handle = $1,
                 version = version + 1,
                 updated_at = $2
             WHERE id = $3 AND version = $4",
        )
        .bind(task_handle)
        .bind(primitive_now_utc())
        .bind(pair.correction.id)
        .bind(pair.correction.version)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn transition_pair(
        &self,
        pair: &EssayPair,
        to: EssayStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let now = primitive_now_utc();
        let mut tx = self.pool.begin().await?;

        let essay_updated = sqlx::query(
            "UPDATE essays
             SET status = $1,
                 error_message = COALESCE($2, error_message),
                 version = version + 1,
                 updated_at = $3
             WHERE id = $4 AND version = $5",
        )
        .bind(to)
        .bind(error_message)
        .bind(now)
        .bind(pair.essay.id)
        .bind(pair.essay.version)
        .execute(&mut *tx)
        .await?;

        if essay_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let correction_updated = sqlx::query(
            "UPDATE corrections
             SET status = $1,
                 error_message = COALESCE($2, error_message),
                 version = version + 1,
                 updated_at = $3
             WHERE id = $4 AND version = $5",
        )
        .bind(to.correction_counterpart())
        .bind(error_message)
        .bind(now)
        .bind(pair.correction.id)
        .bind(pair.correction.version)
        .execute(&mut *tx)
        .await?;

        if correction_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn complete_pair(
        &self,
        pair: &EssayPair,
        outcome: &CorrectionResultUpdate,
    ) -> Result<bool, StoreError> {
        let now = primitive_now_utc();
        let mut tx = self.pool.begin().await?;

        let essay_updated = sqlx::query(
            "UPDATE essays
             SET status = $1,
                 score = $2,
                 corrected_content = $3,
                 comments = $4,
                 error_analysis = $5,
                 improvement_suggestions = $6,
                 error_message = NULL,
                 version = version + 1,
                 updated_at = $7
             WHERE id = $8 AND version = $9",
        )
        .bind(EssayStatus::Completed)
        .bind(outcome.score)
        .bind(&outcome.corrected_content)
        .bind(&outcome.comments)
        .bind(outcome.error_analysis.clone().map(Json))
        .bind(outcome.improvement_suggestions.clone().map(Json))
        .bind(now)
        .bind(pair.essay.id)
        .bind(pair.essay.version)
        .execute(&mut *tx)
        .await?;

        if essay_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let correction_updated = sqlx::query(
            "UPDATE corrections
             SET status = $1,
                 score = $2,
                 comments = $3,
                 error_analysis = $4,
                 improvement_suggestions = $5,
                 results = $6,
                 retry_count = $7,
                 error_message = NULL,
                 completed_at = $8,
                 version = version + 1,
                 updated_at = $9
             WHERE id = $10 AND version = $11",
        )
        .bind(CorrectionStatus::Completed)
        .bind(outcome.score)
        .bind(&outcome.comments)
        .bind(outcome.error_analysis.clone().map(Json))
        .bind(outcome.improvement_suggestions.clone().map(Json))
        .bind(Json(outcome.results.clone()))
        .bind(outcome.retry_count)
        .bind(outcome.completed_at)
        .bind(now)
        .bind(pair.correction.id)
        .bind(pair.correction.version)
        .execute(&mut *tx)
        .await?;

        if correction_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_pair(
        &self,
        pair: &EssayPair,
        error_message: &str,
        retry_count: i32,
    ) -> Result<bool, StoreError> {
        let now = primitive_now_utc();
        let mut tx = self.pool.begin().await?;

        let essay_updated = sqlx::query(
            "UPDATE essays
             SET status = $1,
                 error_message = $2,
                 version = version + 1,
                 updated_at = $3
             WHERE id = $4 AND version = $5",
        )
        .bind(EssayStatus::Failed)
        .bind(error_message)
        .bind(now)
        .bind(pair.essay.id)
        .bind(pair.essay.version)
        .execute(&mut *tx)
        .await?;

        if essay_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let correction_updated = sqlx::query(
            "UPDATE corrections
             SET status = $1,
                 error_message = $2,
                 retry_count = $3,
                 version = version + 1,
                 updated_at = $4
             WHERE id = $5 AND version = $6",
        )
        .bind(CorrectionStatus::Failed)
        .bind(error_message)
        .bind(retry_count)
        .bind(now)
        .bind(pair.correction.id)
        .bind(pair.correction.version)
        .execute(&mut *tx)
        .await?;

        if correction_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn reset_pair(&self, pair: &EssayPair, to: EssayStatus) -> Result<bool, StoreError> {
        let now = primitive_now_utc();
        let mut tx = self.pool.begin().await?;

        let essay_updated = sqlx::query(
            "UPDATE essays
             SET status = $1,
                 error_message = NULL,
                 version = version + 1,
                 updated_at = $2
             WHERE id = $3 AND version = $4",
        )
        .bind(to)
        .bind(now)
        .bind(pair.essay.id)
        .bind(pair.essay.version)
        .execute(&mut *tx)
        .await?;

        if essay_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let correction_updated = sqlx::query(
            "UPDATE corrections
             SET status = $1,
                 task_handle = NULL,
                 error_message = NULL,
                 version = version + 1,
                 updated_at = $2
             WHERE id = $3 AND version = $4",
        )
        .bind(to.correction_counterpart())
        .bind(now)
        .bind(pair.correction.id)
        .bind(pair.correction.version)
        .execute(&mut *tx)
        .await?;

        if correction_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_phase_mismatched(&self, limit: i64) -> Result<Vec<EssayPair>, StoreError> {
        let essay_ids = sqlx::query_scalar::<_, i64>(
            "SELECT e.id
             FROM essays e
             JOIN corrections c ON c.essay_id = e.id AND NOT c.is_deleted
             WHERE CASE e.status::text
                       WHEN 'pending' THEN 'queued'
                       WHEN 'processing' THEN 'queued'
                       WHEN 'archived' THEN 'completed'
                       ELSE e.status::text
                   END
                <> CASE c.status::text
                       WHEN 'pending' THEN 'queued'
                       WHEN 'processing' THEN 'queued'
                       ELSE c.status::text
                   END
             ORDER BY e.updated_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.load_pairs(essay_ids).await
    }

    async fn list_stale_correcting(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<EssayPair>, StoreError> {
        let essay_ids = sqlx::query_scalar::<_, i64>(
            "SELECT essay_id FROM corrections
             WHERE NOT is_deleted AND status = $1 AND updated_at < $2
             ORDER BY updated_at
             LIMIT $3",
        )
        .bind(CorrectionStatus::Correcting)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.load_pairs(essay_ids).await
    }
}
