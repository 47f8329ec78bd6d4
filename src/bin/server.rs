//! HTTP server binary for transcript-summarizer.
//!
//! A thin shim over the library crate that maps CLI flags / environment
//! variables to `ServiceConfig`, following the same `clap` derive + `env =`
//! convention the teacher's `bin/pdf2md.rs` uses for every `ConversionConfig`
//! field.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transcript_summarizer::cleanup::{self, CleanupSettings};
use transcript_summarizer::config::ServiceConfig;
use transcript_summarizer::http::{router, AppState};
use transcript_summarizer::model_client::{HttpModelClient, ModelClient};

/// Run the transcript-summarizer HTTP service.
#[derive(Parser, Debug)]
#[command(
    name = "transcript-summarizer-server",
    version,
    about = "Ingest, segment, deduplicate, and summarize earnings/conference-call PDF transcripts over HTTP"
)]
struct Cli {
    /// Root directory for transcript records, job directories, and the dedup index.
    #[arg(long, env = "CACHE_ROOT", default_value = "local_cache")]
    cache_root: String,

    /// Maximum accepted upload size, in megabytes.
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 10)]
    max_upload_mb: u64,

    /// Days a terminal job may sit before the cleanup worker removes it.
    #[arg(long, env = "RETENTION_DAYS", default_value_t = 2)]
    retention_days: u32,

    /// Days before a job is removed regardless of its stage.
    #[arg(long, env = "FORCE_CLEANUP_DAYS", default_value_t = 7)]
    force_cleanup_days: u32,

    /// Seconds between cleanup worker cycles.
    #[arg(long, env = "CLEANUP_INTERVAL_SECONDS", default_value_t = 6 * 60 * 60)]
    cleanup_interval_seconds: u64,

    /// `remaining_tokens` threshold below which the Stage Runner backs off before fan-out.
    #[arg(long, env = "REMAINING_TOKENS_THRESHOLD", default_value_t = 40_000)]
    remaining_tokens_threshold: u64,

    /// Wall-clock deadline, in seconds, for the combined Overview+Judge fan-out.
    #[arg(long, env = "FAN_OUT_DEADLINE_SECONDS", default_value_t = 5 * 60)]
    fan_out_deadline_secs: u64,

    /// Per-call network timeout for the Model Client.
    #[arg(long, env = "MODEL_TIMEOUT_SECONDS", default_value_t = 120)]
    model_timeout_secs: u64,

    /// HTTP listen address.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    /// Comma-separated CORS allowlist. Empty means no cross-origin requests are permitted.
    #[arg(long, env = "CORS_ORIGINS", default_value = "")]
    cors_origins: String,

    /// Bearer token / API key for the configured model provider.
    #[arg(long, env = "MODEL_PROVIDER_API_KEY")]
    model_provider_api_key: Option<String>,

    /// Base URL of the model provider's generation endpoint.
    #[arg(long, env = "MODEL_BASE_URL", default_value = "https://api.openai.com/v1")]
    model_base_url: String,

    /// Model identifier passed to the Model Client.
    #[arg(long, env = "MODEL_NAME", default_value = "gpt-4.1-mini")]
    model_name: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let cors_origins: Vec<String> = cli
        .cors_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let config = Arc::new(
        ServiceConfig::builder()
            .cache_root(cli.cache_root)
            .max_upload_mb(cli.max_upload_mb)
            .retention_days(cli.retention_days)
            .force_cleanup_days(cli.force_cleanup_days)
            .cleanup_interval_seconds(cli.cleanup_interval_seconds)
            .remaining_tokens_threshold(cli.remaining_tokens_threshold)
            .fan_out_deadline_secs(cli.fan_out_deadline_secs)
            .model_timeout_secs(cli.model_timeout_secs)
            .bind_addr(cli.bind_addr.clone())
            .cors_origins(cors_origins)
            .model_api_key(cli.model_provider_api_key)
            .model_base_url(cli.model_base_url)
            .build()?,
    );

    let model_client: Arc<dyn ModelClient> = Arc::new(
        HttpModelClient::new(config.model_base_url.clone(), config.model_api_key.clone(), cli.model_name)
            .with_timeout(Duration::from_secs(config.model_timeout_secs)),
    );

    let state = AppState::new(config.clone(), model_client);

    cleanup::spawn(
        state.registry.clone(),
        state.dedup.clone(),
        CleanupSettings {
            retention_days: config.retention_days,
            force_cleanup_days: config.force_cleanup_days,
            interval: Duration::from_secs(config.cleanup_interval_seconds),
            startup_delay: Duration::from_secs(30),
        },
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
