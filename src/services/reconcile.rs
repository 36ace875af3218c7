use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use time::Duration as TimeDuration;

use crate::core::time::primitive_now_utc;
use crate::db::types::EssayStatus;
use crate::dispatch::{TaskDispatcher, TaskStatus};
use crate::services::scoring::normalize;
use crate::store::{CorrectionResultUpdate, CorrectionStore, EssayPair};


const RECONCILE_BATCH_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct ReconcileReport {
    pub(crate) fixed_count: u64,
    pub(crate) stale_count: u64,
}

/// Periodic self-healing sweep. Repairs essay/correction pairs whose phases
/// drifted apart and recovers corrections stuck in CORRECTING, using the
/// dispatcher as ground truth. Every write is version-guarded, so a pair a
/// live worker is moving concurrently is simply skipped until the next run.
#[derive(Clone)]
pub(crate) struct ReconciliationService {
    store: Arc<dyn CorrectionStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    stale_after: Duration,
}

impl ReconciliationService {
    pub(crate) fn new(
        store: Arc<dyn CorrectionStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        stale_after: Duration,
    ) -> Self {
        Self { store, dispatcher, stale_after }
    }

    pub(crate) async fn reconcile(&self) -> Result<ReconcileReport> {
        let fixed_count = self.repair_phase_mismatches().await?;
        let stale_count = self.recover_stale_corrections().await?;

        if fixed_count > 0 || stale_count > 0 {
            tracing::warn!(fixed_count, stale_count, "Reconciliation repaired drifted records");
        } else {
            tracing::debug!("Reconciliation found nothing to repair");
        }

        metrics::counter!("reconcile_runs_total").increment(1);
        metrics::counter!("reconcile_fixed_total").increment(fixed_count);
        metrics::counter!("reconcile_stale_reset_total").increment(stale_count);

        Ok(ReconcileReport { fixed_count, stale_count })
    }

    /// Pass 1: pairs whose lifecycle phases disagree. The dispatcher decides
    /// which side of the pair is telling the truth.
    async fn repair_phase_mismatches(&self) -> Result<u64> {
        let pairs = self
            .store
            .list_phase_mismatched(RECONCILE_BATCH_LIMIT)
            .await
            .context("Failed to list phase-mismatched pairs")?;

        let mut fixed = 0_u64;
        for pair in pairs {
            let essay_id = pair.essay.id;
            let status = self.task_status(&pair).await?;

            let repaired = match status {
                TaskStatus::Pending | TaskStatus::Running => self
                    .store
                    .transition_pair(&pair, EssayStatus::Correcting, None)
                    .await
                    .context("Failed to realign pair to CORRECTING")?,
                TaskStatus::Succeeded => match completion_from_correction(&pair) {
                    Some(update) => self
                        .store
                        .complete_pair(&pair, &update)
                        .await
                        .context("Failed to realign pair to COMPLETED")?,
                    // The job finished but no results were ever persisted;
                    // there is nothing to materialize, so run it again.
                    None => self
                        .store
                        .reset_pair(&pair, EssayStatus::Pending)
                        .await
                        .context("Failed to reset result-less pair")?,
                },
                TaskStatus::Failed | TaskStatus::Cancelled => self
                    .store
                    .transition_pair(
                        &pair,
                        EssayStatus::Failed,
                        Some("Correction job failed; detected by reconciliation"),
                    )
                    .await
                    .context("Failed to realign pair to FAILED")?,
                // No job to recover; clear the handle so the essay can be
                // resubmitted.
                TaskStatus::Unknown => self
                    .store
                    .reset_pair(&pair, EssayStatus::Pending)
                    .await
                    .context("Failed to reset pair with unknown job")?,
            };

            if repaired {
                fixed += 1;
                tracing::info!(
                    essay_id,
                    essay_status = %pair.essay.status,
                    correction_status = %pair.correction.status,
                    task_status = status.as_str(),
                    "Repaired phase mismatch"
                );
            } else {
                tracing::debug!(essay_id, "Skipped mismatched pair; a writer beat the repair");
            }
        }

        Ok(fixed)
    }

    /// Pass 2: corrections sitting in CORRECTING past the staleness
    /// threshold. Genuinely live jobs are left alone; the rest are cancelled
    /// best-effort and reset for resubmission.
    async fn recover_stale_corrections(&self) -> Result<u64> {
        let cutoff = primitive_now_utc() - seconds_as_duration(self.stale_after.as_secs());
        let pairs = self
            .store
            .list_stale_correcting(cutoff, RECONCILE_BATCH_LIMIT)
            .await
            .context("Failed to list stale corrections")?;

        let mut reset = 0_u64;
        for pair in pairs {
            let essay_id = pair.essay.id;
            let status = self.task_status(&pair).await?;

            if matches!(status, TaskStatus::Pending | TaskStatus::Running) {
                tracing::info!(
                    essay_id,
                    task_status = status.as_str(),
                    "Stale correction still has a live job; leaving as-is"
                );
                continue;
            }

            if let Some(task_handle) = pair.correction.task_handle.as_deref() {
                if let Err(err) = self.dispatcher.cancel(task_handle).await {
                    tracing::warn!(essay_id, error = %err, "Failed to cancel stale job");
                }
            }

            if self
                .store
                .reset_pair(&pair, EssayStatus::Pending)
                .await
                .context("Failed to reset stale correction")?
            {
                reset += 1;
                tracing::warn!(
                    essay_id,
                    task_status = status.as_str(),
                    "Reset stale correction for resubmission"
                );
            } else {
                tracing::debug!(essay_id, "Skipped stale pair; a writer beat the reset");
            }
        }

        Ok(reset)
    }

    async fn task_status(&self, pair: &EssayPair) -> Result<TaskStatus> {
        match pair.correction.task_handle.as_deref() {
            Some(task_handle) => self
                .dispatcher
                .status(task_handle)
                .await
                .context("Failed to query dispatcher for job status"),
            None => Ok(TaskStatus::Unknown),
        }
    }
}

/// Rebuild a completion update from what the correction row already carries.
/// `None` when no score was ever persisted.
fn completion_from_correction(pair: &EssayPair) -> Option<CorrectionResultUpdate> {
    let correction = &pair.correction;
    let score = correction.score?;
    let results = correction.results.clone().map(|json| json.0).unwrap_or(Value::Null);

    Some(CorrectionResultUpdate {
        score,
        corrected_content: pair
            .essay
            .corrected_content
            .clone()
            .or_else(|| normalize::content_from_results(&results)),
        comments: correction.comments.clone(),
        error_analysis: correction.error_analysis.clone().map(|json| json.0),
        improvement_suggestions: correction.improvement_suggestions.clone().map(|json| json.0),
        results,
        retry_count: correction.retry_count,
        completed_at: correction.completed_at.unwrap_or_else(primitive_now_utc),
    })
}

fn seconds_as_duration(seconds: u64) -> TimeDuration {
    TimeDuration::seconds(seconds.min(i64::MAX as u64) as i64)
}
