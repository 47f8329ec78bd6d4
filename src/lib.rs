//! # transcript-summarizer
//!
//! Ingests a PDF transcript of a corporate earnings or conference call,
//! validates and segments it into Presentation and Q&A sections, then
//! orchestrates a multi-stage pipeline of remote model invocations to
//! produce three artifacts per job: a structured Q&A summary, a call
//! overview, and an automated evaluation of the Q&A summary.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Segment   typographic analysis splits Presentation / Q&A (src/segmenter.rs)
//!  ├─ 2. Store     persist the transcript record, compute its content hash (src/store.rs)
//!  ├─ 3. Dedup     signature lookup; reuse a completed job on a hit (src/dedup.rs)
//!  ├─ 4. Run       Q&A summary, then parallel {Overview, Judge} (src/runner.rs)
//!  └─ 5. Serve     submit / poll / cancel over HTTP (src/http/)
//! ```
//!
//! A background cleanup worker (`src/cleanup.rs`) garbage-collects stuck and
//! finished job directories and prunes the dedup index on an interval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transcript_summarizer::config::ServiceConfig;
//! use transcript_summarizer::http::AppState;
//! use transcript_summarizer::model_client::{HttpModelClient, ModelClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServiceConfig::default());
//!     let model_client: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(
//!         config.model_base_url.clone(),
//!         config.model_api_key.clone(),
//!         "gpt-4.1-mini",
//!     ));
//!     let state = AppState::new(config, model_client);
//!     let router = transcript_summarizer::http::router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod atomic;
pub mod cleanup;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod model_client;
pub mod registry;
pub mod runner;
pub mod schemas;
pub mod segmenter;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{AppError, ModelClientError, StageError};
pub use model_client::{GenerateRequest, GenerateResponse, HttpModelClient, ModelClient};
pub use registry::{JobRegistry, JobStatus};
pub use runner::{RunnerSettings, StageRunner};
