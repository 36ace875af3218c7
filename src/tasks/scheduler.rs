use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::CorrectionJob;
use crate::db::types::JobStatus;
use crate::services::correction::CorrectionOutcome;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let worker_concurrency = state.settings().queue().worker_concurrency;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(worker_concurrency + 2);

    for _ in 0..worker_concurrency {
        handles.push(tokio::spawn(correction_worker(state.clone(), shutdown_rx.clone())));
    }

    handles.push(tokio::spawn(reconcile_loop(state.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(queue_maintenance_loop(state.clone(), shutdown_rx.clone())));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn correction_worker(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let poll_interval = state.settings().queue().poll_interval();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match state.queue().claim_next().await {
            Ok(Some(job)) => {
                let claimed_at = job.started_at.unwrap_or_else(primitive_now_utc);
                let queue_latency =
                    (claimed_at.assume_utc() - job.queued_at.assume_utc()).as_seconds_f64();
                metrics::counter!("correction_jobs_claimed_total").increment(1);
                metrics::histogram!("correction_queue_latency_seconds").record(queue_latency);
                process_delivery(&state, &job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim correction job"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(poll_interval) => {}
        }
    }
}

/// Run one claimed delivery through the engine, then settle it with the
/// queue. A correction that failed at the business level still counts as a
/// processed delivery; only an engine error hands the job back for another
/// attempt.
async fn process_delivery(state: &AppState, job: &CorrectionJob) {
    let essay_id = job.essay_id;

    match state.engine().run_correction(essay_id).await {
        Ok(CorrectionOutcome::Failed { message }) => {
            if let Err(err) = state.queue().ack_failure(&job.id, &message).await {
                tracing::error!(
                    essay_id,
                    job_id = %job.id,
                    error = %err,
                    "Failed to acknowledge failed delivery"
                );
            }
        }
        Ok(outcome) => {
            tracing::debug!(essay_id, job_id = %job.id, ?outcome, "Delivery processed");
            if let Err(err) = state.queue().ack_success(&job.id).await {
                tracing::error!(
                    essay_id,
                    job_id = %job.id,
                    error = %err,
                    "Failed to acknowledge delivery"
                );
            }
        }
        Err(err) => {
            tracing::error!(essay_id, job_id = %job.id, error = %err, "Correction delivery errored");
            match state.queue().nack(&job.id, &err.to_string()).await {
                Ok(Some(JobStatus::Dead)) => {
                    metrics::counter!("correction_jobs_dead_total").increment(1);
                    tracing::error!(
                        essay_id,
                        job_id = %job.id,
                        "Delivery exhausted its attempts; parked as dead"
                    );
                }
                Ok(_) => {}
                Err(nack_err) => {
                    tracing::error!(
                        essay_id,
                        job_id = %job.id,
                        error = %nack_err,
                        "Failed to return delivery to the queue"
                    );
                }
            }
        }
    }
}

async fn reconcile_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(state.settings().reconcile().interval());
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = state.reconciler().reconcile().await {
                    tracing::error!(error = %err, "reconcile failed");
                }
            }
        }
    }
}

/// Requeues jobs whose worker died between claim and acknowledgement.
async fn queue_maintenance_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let job_timeout = state.settings().queue().job_timeout();
    let job_timeout = time::Duration::seconds(job_timeout.as_secs().min(i64::MAX as u64) as i64);

    let mut tick = interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let cutoff = primitive_now_utc() - job_timeout;
                match state.queue().requeue_timed_out(cutoff).await {
                    Ok(requeued) if !requeued.is_empty() => {
                        metrics::counter!("correction_jobs_timed_out_total")
                            .increment(requeued.len() as u64);
                        tracing::warn!(count = requeued.len(), "Requeued timed-out correction jobs");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "requeue_timed_out failed"),
                }
            }
        }
    }
}
