mod postgres;

pub(crate) use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Correction, Essay};
use crate::db::types::EssayStatus;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("essay {0} has no live correction")]
    CorrectionMissing(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct NewEssay {
    pub(crate) user_id: String,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) word_count: i32,
    pub(crate) grade: Option<String>,
}

/// An essay together with its live correction, read in one shot. Conditional
/// writes use the versions captured here as their predicate, so a pair value
/// doubles as the optimistic-write witness.
#[derive(Debug, Clone)]
pub(crate) struct EssayPair {
    pub(crate) essay: Essay,
    pub(crate) correction: Correction,
}

/// Result fields persisted when a correction completes. Shapes the single
/// UPDATE that moves both records to COMPLETED.
#[derive(Debug, Clone)]
pub(crate) struct CorrectionResultUpdate {
    pub(crate) score: f64,
    pub(crate) corrected_content: Option<String>,
    pub(crate) comments: Option<String>,
    pub(crate) error_analysis: Option<serde_json::Value>,
    pub(crate) improvement_suggestions: Option<Vec<String>>,
    pub(crate) results: serde_json::Value,
    pub(crate) retry_count: i32,
    pub(crate) completed_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EssayFilter {
    pub(crate) user_id: Option<String>,
    pub(crate) status: Option<EssayStatus>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

/// Persistence seam of the workflow engine. Every essay/correction write in
/// the system goes through one of these methods; each mutating method updates
/// both rows in a single transaction guarded by the witness pair's versions
/// and reports `false` (nothing written) when a concurrent writer got there
/// first. Status legality is the caller's concern; the store only enforces
/// the version predicate, which lets reconciliation apply repairs that are
/// not in the regular transition table.
#[async_trait]
pub(crate) trait CorrectionStore: Send + Sync {
    /// Insert an essay and its correction atomically, both PENDING.
    async fn create_pair(&self, new_essay: NewEssay) -> Result<EssayPair, StoreError>;

    async fn fetch_pair(&self, essay_id: i64) -> Result<Option<EssayPair>, StoreError>;

    async fn fetch_essay(&self, essay_id: i64) -> Result<Option<Essay>, StoreError>;

    async fn list_essays(&self, filter: EssayFilter) -> Result<Vec<Essay>, StoreError>;

    /// Record the dispatcher handle on the correction.
    async fn attach_task_handle(
        &self,
        pair: &EssayPair,
        task_handle: &str,
    ) -> Result<bool, StoreError>;

    /// Move both records to `to` (the correction to its paired counterpart),
    /// optionally setting an error message on both.
    async fn transition_pair(
        &self,
        pair: &EssayPair,
        to: EssayStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Move both records to COMPLETED with the scoring outcome.
    async fn complete_pair(
        &self,
        pair: &EssayPair,
        outcome: &CorrectionResultUpdate,
    ) -> Result<bool, StoreError>;

    /// Move both records to FAILED with a human-readable message.
    async fn fail_pair(
        &self,
        pair: &EssayPair,
        error_message: &str,
        retry_count: i32,
    ) -> Result<bool, StoreError>;

    /// Reset both records to a queued status (PENDING or PROCESSING), clearing
    /// the task handle and error message so the essay can be dispatched again.
    async fn reset_pair(&self, pair: &EssayPair, to: EssayStatus) -> Result<bool, StoreError>;

    /// Pairs whose lifecycle phases disagree, oldest drift first.
    async fn list_phase_mismatched(&self, limit: i64) -> Result<Vec<EssayPair>, StoreError>;

    /// Pairs whose correction sits in CORRECTING untouched since `cutoff`.
    async fn list_stale_correcting(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<EssayPair>, StoreError>;
}
