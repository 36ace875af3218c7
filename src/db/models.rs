use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{CorrectionStatus, CorrectionType, EssayStatus, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Essay {
    pub(crate) id: i64,
    pub(crate) user_id: String,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) word_count: i32,
    pub(crate) grade: Option<String>,
    pub(crate) status: EssayStatus,
    pub(crate) score: Option<f64>,
    pub(crate) corrected_content: Option<String>,
    pub(crate) comments: Option<String>,
    pub(crate) error_analysis: Option<Json<serde_json::Value>>,
    pub(crate) improvement_suggestions: Option<Json<Vec<String>>>,
    pub(crate) error_message: Option<String>,
    pub(crate) version: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Correction {
    pub(crate) id: i64,
    pub(crate) essay_id: i64,
    pub(crate) status: CorrectionStatus,
    pub(crate) correction_type: CorrectionType,
    pub(crate) task_handle: Option<String>,
    pub(crate) results: Option<Json<serde_json::Value>>,
    pub(crate) score: Option<f64>,
    pub(crate) comments: Option<String>,
    pub(crate) error_analysis: Option<Json<serde_json::Value>>,
    pub(crate) improvement_suggestions: Option<Json<Vec<String>>>,
    pub(crate) retry_count: i32,
    pub(crate) error_message: Option<String>,
    pub(crate) version: i32,
    pub(crate) is_deleted: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct CorrectionJob {
    pub(crate) id: String,
    pub(crate) essay_id: i64,
    pub(crate) status: JobStatus,
    pub(crate) attempts: i32,
    pub(crate) max_attempts: i32,
    pub(crate) last_error: Option<String>,
    pub(crate) queued_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) finished_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}
