use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::db::types::EssayStatus;
use crate::schemas::essay::{
    CorrectionResponse, EssayCreate, EssayDetailResponse, EssayResponse, EssaySubmitResponse,
};
use crate::services::correction::EssaySubmission;
use crate::store::EssayFilter;

const fn default_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub(crate) struct EssayListQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    status: Option<EssayStatus>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_essays).post(submit_essay))
        .route("/:essay_id", get(get_essay))
}

async fn submit_essay(
    State(state): State<AppState>,
    Json(payload): Json<EssayCreate>,
) -> Result<(StatusCode, Json<EssaySubmitResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let receipt = state
        .engine()
        .submit(EssaySubmission {
            user_id: payload.user_id,
            title: payload.title,
            content: payload.content,
            grade: payload.grade,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EssaySubmitResponse { essay_id: receipt.essay_id, task_handle: receipt.task_handle }),
    ))
}

async fn get_essay(
    Path(essay_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<EssayDetailResponse>, ApiError> {
    let pair = state
        .store()
        .fetch_pair(essay_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load essay"))?
        .ok_or_else(|| ApiError::NotFound(format!("Essay {essay_id} not found")))?;

    Ok(Json(EssayDetailResponse {
        essay: EssayResponse::from_db(pair.essay),
        correction: CorrectionResponse::from_db(pair.correction),
    }))
}

async fn list_essays(
    State(state): State<AppState>,
    Query(params): Query<EssayListQuery>,
) -> Result<Json<Vec<EssayResponse>>, ApiError> {
    let essays = state
        .store()
        .list_essays(EssayFilter {
            user_id: params.user_id,
            status: params.status,
            skip: params.skip.max(0),
            limit: params.limit.clamp(1, 100),
        })
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list essays"))?;

    Ok(Json(essays.into_iter().map(EssayResponse::from_db).collect()))
}
