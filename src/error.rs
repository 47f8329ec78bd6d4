//! Error types for the transcript-summarizer service.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AppError`] — **Fatal**: surfaced directly to an HTTP response (bad
//!   upload, unreadable PDF, unknown job id). Every variant carries the
//!   user-visible `code` string from the service's error taxonomy and maps to
//!   a status code via [`AppError::status_code`].
//!
//! * [`StageError`] — **Non-fatal**: one pipeline stage (Overview or Judge)
//!   failed but its sibling stage may still succeed. Recorded into a job's
//!   `status.json` rather than propagated as a Rust error.
//!
//! The separation lets the Stage Runner decide its own tolerance per stage:
//! the Q&A stage treats its failure as fatal to the whole job, while Overview
//! and Judge treat theirs as partial failures (§7 of the design).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the transcript-summarizer library.
///
/// Stage-level failures use [`StageError`] and are stored in a job's
/// `status.json` rather than propagated here.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded file's declared content type is not `application/pdf`,
    /// or its first bytes are not the `%PDF` magic.
    #[error("Invalid file type: expected a PDF, received '{content_type}'")]
    InvalidFileType { content_type: String },

    /// The uploaded file exceeds the configured size limit.
    #[error("File too large: {size_bytes} bytes exceeds the {limit_bytes}-byte limit")]
    FileTooLarge { size_bytes: u64, limit_bytes: u64 },

    /// The PDF could not be parsed, or contained no extractable text.
    #[error("Failed to process PDF '{filename}': {detail}")]
    PdfProcessingError { filename: String, detail: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// No job directory exists for the requested id.
    #[error("Job '{job_id}' not found")]
    JobNotFound { job_id: String },

    /// `status.json` exists but could not be read or parsed.
    #[error("Failed to read status for job '{job_id}': {detail}")]
    StatusReadError { job_id: String, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// An atomic write (temp + fsync + rename) failed.
    #[error("Failed to persist '{path}': {source}")]
    PersistError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Model client errors surfaced without a job context ────────────────
    /// The provider returned empty output with no structured payload.
    #[error("Provider returned empty output")]
    ProviderEmptyOutput,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The user-visible error code, stable across releases; see SPEC_FULL.md §7.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidFileType { .. } => "invalid_file_type",
            AppError::FileTooLarge { .. } => "file_too_large",
            AppError::PdfProcessingError { .. } => "pdf_processing_error",
            AppError::JobNotFound { .. } => "job_not_found",
            AppError::StatusReadError { .. } => "status_read_error",
            AppError::PersistError { .. } => "persist_error",
            AppError::ProviderEmptyOutput => "provider_empty_output",
            AppError::InvalidConfig(_) => "internal_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidFileType { .. }
            | AppError::FileTooLarge { .. }
            | AppError::PdfProcessingError { .. } => StatusCode::BAD_REQUEST,
            AppError::ProviderEmptyOutput => StatusCode::BAD_GATEWAY,
            AppError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::StatusReadError { .. }
            | AppError::PersistError { .. }
            | AppError::InvalidConfig(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// A non-fatal error for a single pipeline stage (Overview or Judge, and the
/// Q&A stage before it is known to be fatal).
///
/// Stored in a job's `status.json` under `error` or appended to `warnings`.
/// Unlike [`AppError`] this is not an enum: the `code` values here are a
/// small but open-ended set (several originate from the Model Client, which
/// may surface provider-specific detail), so a plain struct is the honest
/// representation rather than forcing every provider failure into a fixed
/// set of Rust variants.
#[derive(Debug, Clone, Error, Serialize, serde::Deserialize)]
#[error("{code}: {message}")]
pub struct StageError {
    pub code: String,
    pub message: String,
}

impl StageError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn llm_invalid_json(message: impl Into<String>) -> Self {
        Self::new("llm_invalid_json", message)
    }

    pub fn llm_summary_error(message: impl Into<String>) -> Self {
        Self::new("llm_summary_error", message)
    }

    pub fn llm_overview_error(message: impl Into<String>) -> Self {
        Self::new("llm_overview_error", message)
    }

    pub fn llm_judge_error(message: impl Into<String>) -> Self {
        Self::new("llm_judge_error", message)
    }

    pub fn cancelled() -> Self {
        Self::new("cancelled", "Cancelled by user")
    }

    pub fn timed_out() -> Self {
        Self::new("timed_out", "Stage timed out")
    }
}

/// Errors raised by a [`crate::model_client::ModelClient`] implementation.
///
/// Callers classify these into `StageError` codes according to which stage
/// invoked the client (`llm_summary_error` / `llm_overview_error` /
/// `llm_judge_error`) — the client itself has no notion of "stage".
#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned empty output")]
    EmptyOutput,

    #[error("structured output did not match the expected schema: {0}")]
    SchemaMismatch(String),

    #[error("provider request timed out after {0}s")]
    Timeout(u64),
}
