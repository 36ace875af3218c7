use std::collections::BTreeMap;

use serde_json::Value;

use super::{NormalizedResult, ScoringError};

const TOTAL_KEYS: &[&str] =
    &["total_score", "totalScore", "overall_score", "overallScore", "score", "total"];
const DIMENSION_KEYS: &[&str] =
    &["dimension_scores", "dimensionScores", "dimensions", "criteria_scores", "criteriaScores"];
const ERROR_KEYS: &[&str] = &["error_list", "errorList", "errors", "error_analysis"];
const COMMENT_KEYS: &[&str] =
    &["narrative_comments", "narrativeComments", "comments", "feedback", "overall_comment"];
const SUGGESTION_KEYS: &[&str] =
    &["improvement_suggestions", "improvementSuggestions", "suggestions", "recommendations"];
const CONTENT_KEYS: &[&str] = &[
    "normalized_content",
    "normalizedContent",
    "corrected_content",
    "correctedContent",
    "corrected_essay",
];

const DIMENSION_NAME_KEYS: &[&str] = &["name", "dimension", "criterion", "criterion_name"];
const DIMENSION_SCORE_KEYS: &[&str] = &["score", "value", "points"];

/// Decode an engine payload into the canonical result shape. Known alternate
/// field names are mapped onto the canonical ones; a payload without a usable
/// total score is rejected rather than defaulted to zero.
pub(crate) fn from_response(raw: Value) -> Result<NormalizedResult, ScoringError> {
    let object = raw.as_object().ok_or_else(|| {
        ScoringError::MalformedResponse("Scoring response is not a JSON object".to_string())
    })?;

    let total_score = first_present(object, TOTAL_KEYS)
        .and_then(as_score)
        .ok_or_else(|| {
            ScoringError::MalformedResponse(
                "Scoring response carries no usable total score".to_string(),
            )
        })?;

    let dimension_scores =
        first_present(object, DIMENSION_KEYS).map(decode_dimensions).unwrap_or_default();
    let error_list = first_present(object, ERROR_KEYS).map(decode_errors).unwrap_or_default();
    let narrative_comments = first_present(object, COMMENT_KEYS).and_then(decode_text);
    let improvement_suggestions =
        first_present(object, SUGGESTION_KEYS).map(decode_suggestions).unwrap_or_default();
    let normalized_content =
        first_present(object, CONTENT_KEYS).and_then(Value::as_str).map(str::to_string);

    Ok(NormalizedResult {
        total_score,
        dimension_scores,
        error_list,
        narrative_comments,
        improvement_suggestions,
        normalized_content,
        raw,
    })
}

/// Pull the corrected essay text back out of a stored raw payload.
pub(crate) fn content_from_results(results: &Value) -> Option<String> {
    let object = results.as_object()?;
    first_present(object, CONTENT_KEYS).and_then(Value::as_str).map(str::to_string)
}

fn first_present<'a>(
    object: &'a serde_json::Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key)).filter(|value| !value.is_null())
}

fn as_score(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|score| score.is_finite())
}

fn decode_dimensions(value: &Value) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    match value {
        Value::Object(entries) => {
            for (name, entry) in entries {
                if let Some(score) = as_score(entry) {
                    scores.insert(name.clone(), score);
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let Some(entry) = entry.as_object() else { continue };
                let name = first_present(entry, DIMENSION_NAME_KEYS).and_then(Value::as_str);
                let score = first_present(entry, DIMENSION_SCORE_KEYS).and_then(as_score);
                if let (Some(name), Some(score)) = (name, score) {
                    scores.insert(name.to_string(), score);
                }
            }
        }
        _ => {}
    }
    scores
}

fn decode_errors(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn decode_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let lines: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if lines.is_empty() {
                None
            } else {
                Some(lines.join("\n"))
            }
        }
        _ => None,
    }
}

fn decode_suggestions(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Value::String(text) => vec![text.clone()],
        _ => Vec::new(),
    }
}
