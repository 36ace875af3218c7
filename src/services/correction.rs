use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::core::config::EngineSettings;
use crate::core::time::primitive_now_utc;
use crate::db::types::EssayStatus;
use crate::dispatch::{DispatchError, TaskDispatcher};
use crate::services::locks::LockManager;
use crate::services::scoring::{EssayScorer, NormalizedResult, ScoreRequest, ScoringError};
use crate::store::{CorrectionResultUpdate, CorrectionStore, EssayPair, NewEssay, StoreError};


#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to enqueue correction for essay {essay_id}: {source}")]
    Dispatch {
        essay_id: i64,
        #[source]
        source: DispatchError,
    },
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub(crate) struct EssaySubmission {
    pub(crate) user_id: String,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) grade: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitReceipt {
    pub(crate) essay_id: i64,
    pub(crate) task_handle: String,
}

/// What one delivery of a correction job amounted to. Every variant except a
/// worker-level error is an acknowledged, unremarkable end of the delivery.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CorrectionOutcome {
    /// Scored on this invocation.
    Completed { score: f64 },
    /// A previous invocation already finished this essay.
    AlreadyCompleted { score: Option<f64> },
    /// Another worker holds the essay, or it already sits in CORRECTING.
    AlreadyInProgress,
    /// Lost an optimistic race and the record moved on without us.
    Contended,
    /// The essay is in a state a correction cannot start from.
    NotEligible { status: EssayStatus },
    /// The retry policy was exhausted; both records are FAILED.
    Failed { message: String },
    /// The essay no longer exists.
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RequeueOutcome {
    Requeued { task_handle: String },
    NotEligible { status: EssayStatus },
    Contended,
    Missing,
}

/// Orchestrates the essay/correction lifecycle. All state moves through the
/// injected store's version-guarded writes; the per-essay lock only keeps a
/// second worker from burning a scoring call it would lose anyway.
#[derive(Clone)]
pub(crate) struct CorrectionEngine {
    store: Arc<dyn CorrectionStore>,
    locks: Arc<dyn LockManager>,
    dispatcher: Arc<dyn TaskDispatcher>,
    scorer: Arc<dyn EssayScorer>,
    settings: EngineSettings,
    scoring_timeout: Duration,
}

impl CorrectionEngine {
    pub(crate) fn new(
        store: Arc<dyn CorrectionStore>,
        locks: Arc<dyn LockManager>,
        dispatcher: Arc<dyn TaskDispatcher>,
        scorer: Arc<dyn EssayScorer>,
        settings: EngineSettings,
        scoring_timeout: Duration,
    ) -> Self {
        Self { store, locks, dispatcher, scorer, settings, scoring_timeout }
    }

    /// Validate, create the essay/correction pair, enqueue a correction job
    /// and record its handle. A dispatch failure after commit leaves the pair
    /// PENDING without a handle, which `requeue` can pick up later.
    pub(crate) async fn submit(
        &self,
        submission: EssaySubmission,
    ) -> Result<SubmitReceipt, EngineError> {
        let title = submission.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("Essay title must not be empty".to_string()));
        }

        let content = submission.content.trim();
        let content_chars = content.chars().count() as u64;
        if content_chars < self.settings.min_content_chars {
            return Err(EngineError::Validation(format!(
                "Essay content must be at least {} characters",
                self.settings.min_content_chars
            )));
        }
        if content_chars > self.settings.max_content_chars {
            return Err(EngineError::Validation(format!(
                "Essay content must not exceed {} characters",
                self.settings.max_content_chars
            )));
        }

        let word_count = content.split_whitespace().count() as i32;
        let pair = self
            .store
            .create_pair(NewEssay {
                user_id: submission.user_id,
                title: title.to_string(),
                content: content.to_string(),
                word_count,
                grade: submission.grade,
            })
            .await?;

        let essay_id = pair.essay.id;
        let task_handle = match self.dispatcher.enqueue(essay_id).await {
            Ok(task_handle) => task_handle,
            Err(source) => {
                tracing::warn!(essay_id, error = %source, "Failed to enqueue correction job");
                return Err(EngineError::Dispatch { essay_id, source });
            }
        };

        if !self.store.attach_task_handle(&pair, &task_handle).await? {
            tracing::warn!(
                essay_id,
                task_handle = %task_handle,
                "Task handle not recorded; pair moved concurrently"
            );
        }

        metrics::counter!("essays_submitted_total").increment(1);
        tracing::info!(essay_id, task_handle = %task_handle, word_count, "Essay submitted");

        Ok(SubmitReceipt { essay_id, task_handle })
    }

    /// Worker entry point for one delivery of a correction job. Duplicate
    /// deliveries and lost races all land on quiet no-op outcomes.
    pub(crate) async fn run_correction(
        &self,
        essay_id: i64,
    ) -> Result<CorrectionOutcome, EngineError> {
        let lock = match self.locks.try_acquire(essay_id, self.settings.lock_ttl()).await {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                tracing::debug!(essay_id, "Essay lock held elsewhere; skipping");
                metrics::counter!("correction_lock_contended_total").increment(1);
                return Ok(CorrectionOutcome::AlreadyInProgress);
            }
            Err(err) => {
                // Versioned writes stay correct without the lock; it only
                // trims wasted scoring calls.
                tracing::warn!(essay_id, error = %err, "Lock backend unavailable; continuing unlocked");
                None
            }
        };

        let outcome = self.correct_locked(essay_id).await;

        // A panicking worker never reaches this; the TTL reclaims its key.
        if let Some(lock) = lock {
            if let Err(err) = self.locks.release(&lock).await {
                tracing::warn!(essay_id, error = %err, "Failed to release essay lock");
            }
        }

        outcome
    }

    /// The sole general-purpose mutating primitive, exposed for operator
    /// intervention. Returns false when the stored status is not
    /// `expected_from`, when the move is not in the transition table, or when
    /// a concurrent writer won the version race.
    pub(crate) async fn transition(
        &self,
        essay_id: i64,
        expected_from: EssayStatus,
        to: EssayStatus,
        error_message: Option<&str>,
    ) -> Result<bool, EngineError> {
        if !expected_from.can_transition_to(to) {
            return Ok(false);
        }

        let Some(pair) = self.store.fetch_pair(essay_id).await? else {
            return Ok(false);
        };
        if pair.essay.status != expected_from {
            return Ok(false);
        }

        let applied = self.store.transition_pair(&pair, to, error_message).await?;
        if applied {
            tracing::info!(
                essay_id,
                from = %expected_from,
                to = %to,
                "Applied manual transition"
            );
        }
        Ok(applied)
    }

    /// Put a FAILED essay (or a PENDING one whose enqueue never happened)
    /// back on the queue.
    pub(crate) async fn requeue(&self, essay_id: i64) -> Result<RequeueOutcome, EngineError> {
        let Some(pair) = self.store.fetch_pair(essay_id).await? else {
            return Ok(RequeueOutcome::Missing);
        };

        match pair.essay.status {
            EssayStatus::Failed => {
                if !self.store.reset_pair(&pair, EssayStatus::Pending).await? {
                    return Ok(RequeueOutcome::Contended);
                }
            }
            EssayStatus::Pending if pair.correction.task_handle.is_none() => {}
            status => return Ok(RequeueOutcome::NotEligible { status }),
        }

        // Re-read for fresh versions before recording the new handle.
        let Some(pair) = self.store.fetch_pair(essay_id).await? else {
            return Ok(RequeueOutcome::Missing);
        };

        let task_handle = self
            .dispatcher
            .enqueue(essay_id)
            .await
            .map_err(|source| EngineError::Dispatch { essay_id, source })?;

        if !self.store.attach_task_handle(&pair, &task_handle).await? {
            tracing::warn!(essay_id, task_handle = %task_handle, "Task handle not recorded on requeue");
        }

        metrics::counter!("essays_requeued_total").increment(1);
        tracing::info!(essay_id, task_handle = %task_handle, "Essay requeued");

        Ok(RequeueOutcome::Requeued { task_handle })
    }

    async fn correct_locked(&self, essay_id: i64) -> Result<CorrectionOutcome, EngineError> {
        let Some(pair) = self.store.fetch_pair(essay_id).await? else {
            return Ok(CorrectionOutcome::Missing);
        };

        match pair.essay.status {
            EssayStatus::Completed | EssayStatus::Archived => {
                return Ok(CorrectionOutcome::AlreadyCompleted { score: pair.essay.score });
            }
            EssayStatus::Correcting => {
                // A holder is mid-flight, or died and left the pair to the
                // staleness sweep. This delivery has nothing to do.
                return Ok(CorrectionOutcome::AlreadyInProgress);
            }
            EssayStatus::Failed => {
                return Ok(CorrectionOutcome::NotEligible { status: pair.essay.status });
            }
            EssayStatus::Pending | EssayStatus::Processing => {}
        }

        if !self.store.transition_pair(&pair, EssayStatus::Correcting, None).await? {
            return self.reevaluate_lost_race(essay_id).await;
        }

        // The transition bumped both versions; refresh the write witness.
        let Some(pair) = self.store.fetch_pair(essay_id).await? else {
            return Ok(CorrectionOutcome::Missing);
        };

        let request = ScoreRequest {
            essay_id,
            title: pair.essay.title.clone(),
            content: pair.essay.content.clone(),
            grade: pair.essay.grade.clone(),
            word_count: pair.essay.word_count,
        };

        let started = Instant::now();
        let (retries, attempt) = self.score_with_retries(&request).await;
        match attempt {
            Ok(result) => self.persist_completion(pair, result, retries, started).await,
            Err(err) => self.persist_failure(pair, err, retries).await,
        }
    }

    /// One scoring call per attempt, each under the hard timeout, retrying
    /// transient failures on the configured backoff schedule. Malformed and
    /// permanent failures are surfaced immediately.
    async fn score_with_retries(
        &self,
        request: &ScoreRequest,
    ) -> (u32, Result<NormalizedResult, ScoringError>) {
        let mut retries = 0_u32;
        loop {
            let attempt = match timeout(self.scoring_timeout, self.scorer.score(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ScoringError::Transient(format!(
                    "Scoring call exceeded the {}s limit",
                    self.scoring_timeout.as_secs()
                ))),
            };

            match attempt {
                Ok(result) => return (retries, Ok(result)),
                Err(ScoringError::Transient(message)) if retries < self.settings.max_retries => {
                    retries += 1;
                    let backoff = self.settings.retry_backoff(retries);
                    tracing::warn!(
                        essay_id = request.essay_id,
                        retry = retries,
                        backoff_seconds = backoff.as_secs(),
                        error = %message,
                        "Transient scoring failure; retrying"
                    );
                    metrics::counter!("scoring_retries_total").increment(1);
                    sleep(backoff).await;
                }
                Err(err) => return (retries, Err(err)),
            }
        }
    }

    async fn persist_completion(
        &self,
        pair: EssayPair,
        result: NormalizedResult,
        retries: u32,
        started: Instant,
    ) -> Result<CorrectionOutcome, EngineError> {
        let essay_id = pair.essay.id;
        let update = CorrectionResultUpdate {
            score: result.total_score,
            corrected_content: result.normalized_content.clone(),
            comments: result.narrative_comments.clone(),
            error_analysis: error_analysis_payload(&result),
            improvement_suggestions: if result.improvement_suggestions.is_empty() {
                None
            } else {
                Some(result.improvement_suggestions.clone())
            },
            results: result.raw.clone(),
            retry_count: retries as i32,
            completed_at: primitive_now_utc(),
        };

        let mut witness = pair;
        for _ in 0..2 {
            if self.store.complete_pair(&witness, &update).await? {
                metrics::counter!("corrections_completed_total").increment(1);
                metrics::histogram!("correction_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    essay_id,
                    score = result.total_score,
                    retries,
                    "Correction completed"
                );
                return Ok(CorrectionOutcome::Completed { score: result.total_score });
            }

            // A non-worker writer (reconciliation) touched the pair while we
            // were scoring. Re-read; keep the result only if the pair still
            // sits in CORRECTING.
            let Some(current) = self.store.fetch_pair(essay_id).await? else {
                return Ok(CorrectionOutcome::Missing);
            };
            if current.essay.status != EssayStatus::Correcting {
                return Ok(outcome_for_moved_pair(&current));
            }
            witness = current;
        }

        metrics::counter!("correction_write_conflicts_total").increment(1);
        Ok(CorrectionOutcome::Contended)
    }

    async fn persist_failure(
        &self,
        pair: EssayPair,
        err: ScoringError,
        retries: u32,
    ) -> Result<CorrectionOutcome, EngineError> {
        let essay_id = pair.essay.id;
        let message = err.to_string();

        let mut witness = pair;
        for _ in 0..2 {
            if self.store.fail_pair(&witness, &message, retries as i32).await? {
                metrics::counter!("corrections_failed_total").increment(1);
                tracing::warn!(essay_id, retries, error = %message, "Correction failed");
                return Ok(CorrectionOutcome::Failed { message });
            }

            let Some(current) = self.store.fetch_pair(essay_id).await? else {
                return Ok(CorrectionOutcome::Missing);
            };
            if current.essay.status != EssayStatus::Correcting {
                return Ok(outcome_for_moved_pair(&current));
            }
            witness = current;
        }

        metrics::counter!("correction_write_conflicts_total").increment(1);
        Ok(CorrectionOutcome::Contended)
    }

    async fn reevaluate_lost_race(&self, essay_id: i64) -> Result<CorrectionOutcome, EngineError> {
        metrics::counter!("correction_write_conflicts_total").increment(1);
        let Some(current) = self.store.fetch_pair(essay_id).await? else {
            return Ok(CorrectionOutcome::Missing);
        };
        Ok(outcome_for_moved_pair(&current))
    }
}

fn outcome_for_moved_pair(pair: &EssayPair) -> CorrectionOutcome {
    match pair.essay.status {
        EssayStatus::Completed | EssayStatus::Archived => {
            CorrectionOutcome::AlreadyCompleted { score: pair.essay.score }
        }
        EssayStatus::Correcting => CorrectionOutcome::AlreadyInProgress,
        _ => CorrectionOutcome::Contended,
    }
}

fn error_analysis_payload(result: &NormalizedResult) -> Option<serde_json::Value> {
    if result.dimension_scores.is_empty() && result.error_list.is_empty() {
        return None;
    }
    Some(json!({
        "dimensions": result.dimension_scores,
        "errors": result.error_list,
    }))
}
