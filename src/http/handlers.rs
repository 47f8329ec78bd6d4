//! Request handlers and their DTOs, one per endpoint in SPEC_FULL.md §6.

use crate::dedup;
use crate::error::AppError;
use crate::http::AppState;
use crate::registry::JobStatus;
use crate::runner::RunnerSettings;
use crate::segmenter;
use crate::store::{AnswerFormat, CallType, SummaryLength, TranscriptInput};
use axum::extract::{Multipart, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    message: &'static str,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Financial Summarizer API",
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Response shape for `/validate_file`. `is_validated: false` carries an
/// `error` payload without being an HTTP error response itself — a
/// malformed upload (wrong content type, oversized file) is the only case
/// that surfaces as an actual `AppError` response.
#[derive(Debug, Serialize)]
pub struct ValidateFileResponse {
    pub is_validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<TranscriptInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ValidateFileResponse {
    fn invalid(code: &str, message: impl Into<String>) -> Self {
        Self {
            is_validated: false,
            validated_at: None,
            input: None,
            transcript_name: None,
            job_id: None,
            dedup_hit: None,
            error: Some(ErrorPayload {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// `POST /validate_file` — multipart upload, segmentation, dedup lookup,
/// and (on a miss) new-job creation, per SPEC_FULL.md §6 and
/// `original_source/backend/src/api/routes/file_validation.py`.
pub async fn validate_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ValidateFileResponse>, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut call_type_str = String::new();
    let mut summary_length_str = String::new();
    let mut answer_format_str = "prose".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Internal(format!("failed to read multipart field: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Internal(format!("failed to read file field: {e}")))?
                        .to_vec(),
                );
            }
            "call_type" => {
                call_type_str = field.text().await.unwrap_or_default();
            }
            "summary_length" => {
                summary_length_str = field.text().await.unwrap_or_default();
            }
            "answer_format" => {
                answer_format_str = field.text().await.unwrap_or_else(|_| "prose".to_string());
            }
            _ => {}
        }
    }

    let content_type = content_type.unwrap_or_else(|| "unknown".to_string());
    if content_type != "application/pdf" {
        return Err(AppError::InvalidFileType { content_type });
    }

    let file_bytes = file_bytes.ok_or(AppError::InvalidFileType {
        content_type: "missing".to_string(),
    })?;
    let filename = filename.unwrap_or_else(|| "upload.pdf".to_string());
    let call_type = parse_enum::<CallType>("call_type", &call_type_str)?;
    let summary_length = parse_enum::<SummaryLength>("summary_length", &summary_length_str)?;
    let answer_format = parse_enum::<AnswerFormat>("answer_format", &answer_format_str)?;

    let segmented = segmenter::segment(file_bytes, &filename, state.config.max_upload_bytes).await?;

    if segmented.q_a.trim().is_empty() || !segmenter::has_sufficient_content(&segmented) {
        return Ok(Json(ValidateFileResponse::invalid(
            "no_q_a_transcript",
            "No Q&A transcript found in the document.",
        )));
    }

    let input = TranscriptInput {
        call_type,
        summary_length,
        answer_format,
        filename,
    };
    let record = state.store.persist(input, segmented).await?;

    let prompt_sig = dedup::prompt_signature(
        state.config.prompt_versions.qa_version(call_type.as_str(), summary_length.as_str()),
        &state.config.prompt_versions.overview,
        &state.config.prompt_versions.judge,
    );
    let signature = dedup::compute_signature(
        &record.content_hash,
        call_type.as_str(),
        summary_length.as_str(),
        &prompt_sig,
        answer_format.as_str(),
    );

    if let Some(job_id) = state.dedup.find_reusable(&signature, &state.registry).await {
        return Ok(Json(ValidateFileResponse {
            is_validated: true,
            validated_at: Some(record.validated_at),
            input: Some(record.input),
            transcript_name: Some(record.transcript_name),
            job_id: Some(job_id),
            dedup_hit: Some(true),
            error: None,
        }));
    }

    let job_id = new_job_id(&record.transcript_name);
    let status = JobStatus::new_initial(job_id.clone(), record.transcript_name.clone(), record.input.clone());
    state.registry.create(status).await?;

    let settings = RunnerSettings {
        remaining_tokens_threshold: state.config.remaining_tokens_threshold,
        fan_out_deadline: Duration::from_secs(state.config.fan_out_deadline_secs),
        qa_max_output_tokens: 4096,
        overview_max_output_tokens: 2048,
        judge_max_output_tokens: 2048,
        qa_prompt_version: state
            .config
            .prompt_versions
            .qa_version(call_type.as_str(), summary_length.as_str())
            .to_string(),
        overview_prompt_version: state.config.prompt_versions.overview.clone(),
        judge_prompt_version: state.config.prompt_versions.judge.clone(),
    };
    state.runner.spawn(job_id.clone(), record.clone(), settings);

    // The index is updated only after the runner task is started, matching
    // `job_creation.py`'s ordering — a crash between job creation and this
    // write simply leaves the job unreachable via dedup.
    state.dedup.put(&signature, &job_id).await;

    Ok(Json(ValidateFileResponse {
        is_validated: true,
        validated_at: Some(record.validated_at),
        input: Some(record.input),
        transcript_name: Some(record.transcript_name),
        job_id: Some(job_id),
        dedup_hit: Some(false),
        error: None,
    }))
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &str, value: &str) -> Result<T, AppError> {
    serde_json::from_value(Value::String(value.to_ascii_lowercase()))
        .map_err(|_| AppError::Internal(format!("invalid '{field}' value: '{value}'")))
}

fn new_job_id(transcript_name: &str) -> String {
    let raw = format!("{transcript_name}-{}", Utc::now().to_rfc3339());
    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub job_id: String,
}

/// `GET /summary?job_id=…` — status merged with any materialized outputs.
pub async fn get_summary(
    State(state): State<AppState>,
    Query(params): Query<JobIdQuery>,
) -> Result<Json<Value>, AppError> {
    let status = state
        .registry
        .read_status(&params.job_id)
        .await
        .ok_or_else(|| AppError::JobNotFound {
            job_id: params.job_id.clone(),
        })?;

    let mut response = serde_json::to_value(&status).map_err(|e| AppError::Internal(e.to_string()))?;
    let mut outputs = serde_json::Map::new();
    for name in ["q_a_summary", "overview_summary", "summary_evaluation"] {
        if let Some(value) = state.registry.read_output::<Value>(&params.job_id, name).await {
            outputs.insert(name.to_string(), value);
        }
    }
    if let Value::Object(ref mut map) = response {
        map.insert("outputs".to_string(), Value::Object(outputs));
    }
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub job_id: String,
    pub status: String,
}

/// `POST /cancel?job_id=…`.
pub async fn cancel(
    State(state): State<AppState>,
    Query(params): Query<JobIdQuery>,
) -> Result<Json<CancelResponse>, AppError> {
    state.registry.cancel(&params.job_id).await?;
    Ok(Json(CancelResponse {
        ok: true,
        job_id: params.job_id,
        status: "cancelled".to_string(),
    }))
}
