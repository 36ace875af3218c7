use axum::extract::{Path, State};
use axum::{routing::post, Json, Router};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::essay::{RequeueResponse, TransitionRequest, TransitionResponse};
use crate::services::correction::RequeueOutcome;
use crate::services::reconcile::ReconcileReport;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/essays/:essay_id/transition", post(transition_essay))
        .route("/essays/:essay_id/requeue", post(requeue_essay))
        .route("/reconcile", post(run_reconcile))
}

/// Operator-facing transition primitive. `applied: false` covers a stale
/// `expected_from`, an illegal target, and a lost version race alike; the
/// caller re-reads and decides.
async fn transition_essay(
    Path(essay_id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = state
        .engine()
        .transition(essay_id, payload.expected_from, payload.to, payload.error_message.as_deref())
        .await?;

    Ok(Json(TransitionResponse { applied }))
}

async fn requeue_essay(
    Path(essay_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<RequeueResponse>, ApiError> {
    match state.engine().requeue(essay_id).await? {
        RequeueOutcome::Requeued { task_handle } => {
            Ok(Json(RequeueResponse { essay_id, task_handle }))
        }
        RequeueOutcome::NotEligible { status } => {
            Err(ApiError::Conflict(format!("Essay in status {status} cannot be requeued")))
        }
        RequeueOutcome::Contended => {
            Err(ApiError::Conflict("Essay was modified concurrently; retry".to_string()))
        }
        RequeueOutcome::Missing => Err(ApiError::NotFound(format!("Essay {essay_id} not found"))),
    }
}

async fn run_reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    let report = state
        .reconciler()
        .reconcile()
        .await
        .map_err(|e| ApiError::internal(e, "Reconciliation run failed"))?;

    Ok(Json(report))
}
