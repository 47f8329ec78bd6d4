//! HTTP surface: submit / poll / cancel, plus root and health probes.
//!
//! Wiring follows the teacher's binary-builds-the-thing convention (there is
//! no server in the teacher, so the router itself is new) but the handler
//! shape — `State` extractor, DTOs kept separate from internal types, one
//! `IntoResponse` error type — is grounded in
//! `examples/other_examples/0f30f0d7_kpnaidu1956-fd-ruvector-marshal__crates-goal-rag-src-server-routes-jobs.rs.rs`.
//! Endpoint behavior mirrors `original_source/backend/src/api/app.py` and
//! `routes/{summary,file_validation,health}.py`.

pub mod handlers;

use crate::config::ServiceConfig;
use crate::dedup::DedupIndex;
use crate::model_client::ModelClient;
use crate::registry::JobRegistry;
use crate::runner::StageRunner;
use crate::store::TranscriptStore;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state handed to every handler via axum's `State`
/// extractor, per SPEC_FULL.md §4.4/§9 — one value constructed at startup,
/// not module-level globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<TranscriptStore>,
    pub dedup: Arc<DedupIndex>,
    pub registry: JobRegistry,
    pub runner: Arc<StageRunner>,
}

impl AppState {
    pub fn new(config: Arc<ServiceConfig>, model_client: Arc<dyn ModelClient>) -> Self {
        let registry = JobRegistry::new(config.cache_root.clone());
        let store = Arc::new(TranscriptStore::new(config.cache_root.clone()));
        let dedup = Arc::new(DedupIndex::new(config.cache_root.clone()));
        let runner = Arc::new(StageRunner::new(registry.clone(), model_client));
        Self {
            config,
            store,
            dedup,
            registry,
            runner,
        }
    }
}

/// Build the axum `Router`, CORS and tracing layered on per SPEC_FULL.md §2.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/validate_file", post(handlers::validate_file))
        .route("/summary", get(handlers::get_summary))
        .route("/cancel", post(handlers::cancel))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Empty `CORS_ORIGINS` means no cross-origin requests are permitted,
/// matching `original_source`'s default of an empty allowlist rather than a
/// wildcard (SPEC_FULL.md §6).
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        layer.allow_origin(AllowOrigin::list(Vec::new()))
    } else {
        let parsed = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
