use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Correction, Essay};
use crate::db::types::{CorrectionStatus, CorrectionType, EssayStatus};

/// Submission payload. The engine re-checks the content bounds against its
/// configured limits; the schema only rejects the obviously empty.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct EssayCreate {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub(crate) user_id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) grade: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EssaySubmitResponse {
    pub(crate) essay_id: i64,
    pub(crate) task_handle: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EssayResponse {
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
    pub(crate) error_analysis: Option<serde_json::Value>,
    pub(crate) improvement_suggestions: Option<Vec<String>>,
    pub(crate) error_message: Option<String>,
    pub(crate) version: i32,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl EssayResponse {
    pub(crate) fn from_db(essay: Essay) -> Self {
        Self {
            id: essay.id,
            user_id: essay.user_id,
            title: essay.title,
            content: essay.content,
            word_count: essay.word_count,
            grade: essay.grade,
            status: essay.status,
            score: essay.score,
            corrected_content: essay.corrected_content,
            comments: essay.comments,
            error_analysis: essay.error_analysis.map(|json| json.0),
            improvement_suggestions: essay.improvement_suggestions.map(|json| json.0),
            error_message: essay.error_message,
            version: essay.version,
            created_at: format_primitive(essay.created_at),
            updated_at: format_primitive(essay.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CorrectionResponse {
    pub(crate) id: i64,
    pub(crate) essay_id: i64,
    pub(crate) status: CorrectionStatus,
    pub(crate) correction_type: CorrectionType,
    pub(crate) task_handle: Option<String>,
    pub(crate) results: Option<serde_json::Value>,
    pub(crate) score: Option<f64>,
    pub(crate) comments: Option<String>,
    pub(crate) error_analysis: Option<serde_json::Value>,
    pub(crate) improvement_suggestions: Option<Vec<String>>,
    pub(crate) retry_count: i32,
    pub(crate) error_message: Option<String>,
    pub(crate) version: i32,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) completed_at: Option<String>,
}

impl CorrectionResponse {
    pub(crate) fn from_db(correction: Correction) -> Self {
        Self {
            id: correction.id,
            essay_id: correction.essay_id,
            status: correction.status,
            correction_type: correction.correction_type,
            task_handle: correction.task_handle,
            results: correction.results.map(|json| json.0),
            score: correction.score,
            comments: correction.comments,
            error_analysis: correction.error_analysis.map(|json| json.0),
            improvement_suggestions: correction.improvement_suggestions.map(|json| json.0),
            retry_count: correction.retry_count,
            error_message: correction.error_message,
            version: correction.version,
            created_at: format_primitive(correction.created_at),
            updated_at: format_primitive(correction.updated_at),
            completed_at: correction.completed_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EssayDetailResponse {
    pub(crate) essay: EssayResponse,
    pub(crate) correction: CorrectionResponse,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionRequest {
    pub(crate) expected_from: EssayStatus,
    pub(crate) to: EssayStatus,
    #[serde(default)]
    pub(crate) error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TransitionResponse {
    pub(crate) applied: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequeueResponse {
    pub(crate) essay_id: i64,
    pub(crate) task_handle: String,
}
