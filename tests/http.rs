//! Integration tests exercising the HTTP surface end-to-end with
//! `tower::ServiceExt::oneshot`, following the shape of the teacher's
//! `tests/e2e.rs`. PDF parsing itself is covered by `src/segmenter.rs`'s
//! unit tests; these tests stay on the side of the router that doesn't
//! require a real PDF or a live model provider — root/health, unknown-job
//! 404s, and the content-type rejection path.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use transcript_summarizer::config::ServiceConfig;
use transcript_summarizer::http::{router, AppState};
use transcript_summarizer::model_client::{GenerateRequest, GenerateResponse, ModelClient};
use transcript_summarizer::ModelClientError;

struct UnreachableModelClient;

#[async_trait]
impl ModelClient for UnreachableModelClient {
    async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, ModelClientError> {
        panic!("no test in this suite should reach the Model Client");
    }
}

fn test_state() -> AppState {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(
        ServiceConfig::builder()
            .cache_root(dir.into_path())
            .build()
            .unwrap(),
    );
    let model_client: Arc<dyn ModelClient> = Arc::new(UnreachableModelClient);
    AppState::new(config, model_client)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_returns_message() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn summary_for_unknown_job_is_404() {
    let app = router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/summary?job_id=does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "job_not_found");
}

#[tokio::test]
async fn cancel_for_unknown_job_is_404() {
    let app = router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cancel?job_id=does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "job_not_found");
}

/// Builds a `multipart/form-data` body by hand: simple enough here (three
/// short fields, no binary escaping needed) that pulling in a multipart
/// encoder crate isn't worth it.
fn multipart_body(boundary: &str, file_content_type: &str, file_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"call.txt\"\r\n\
             Content-Type: {file_content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    for (name, value) in [("call_type", "earnings"), ("summary_length", "long"), ("answer_format", "prose")] {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn validate_file_rejects_non_pdf_content_type() {
    let app = router(test_state());
    let boundary = "X-BOUNDARY-1";
    let body = multipart_body(boundary, "text/plain", b"not a pdf");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/validate_file")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_file_type");
}

#[tokio::test]
async fn validate_file_rejects_oversized_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(
        ServiceConfig::builder()
            .cache_root(dir.into_path())
            .max_upload_mb(1)
            .build()
            .unwrap(),
    );
    let model_client: Arc<dyn ModelClient> = Arc::new(UnreachableModelClient);
    let app = router(AppState::new(config, model_client));

    let boundary = "X-BOUNDARY-2";
    // Comfortably above the 1 MiB configured limit but well under axum's
    // own 2 MiB default request body limit, so this exercises our
    // `file_too_large` check rather than axum's.
    let mut oversized = b"%PDF-1.4\n".to_vec();
    oversized.resize(1_200_000, b'a');
    let body = multipart_body(boundary, "application/pdf", &oversized);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/validate_file")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "file_too_large");
}
