//! Service configuration.
//!
//! `ServiceConfig` is assembled once at startup — defaults, overridden by a
//! builder, overridden by environment variables via the server binary's
//! `clap` flags (see `src/bin/server.rs`) — and then shared read-only for the
//! lifetime of the process via `Arc`.
//!
//! The shape and validation style (clamping setters, a `build()` that can
//! fail, a `Debug` impl that never prints a secret) follow the teacher's
//! `ConversionConfig`/`ConversionConfigBuilder`.

use crate::error::AppError;
use std::fmt;
use std::path::PathBuf;

/// Selects the Q&A prompt version for a given `(call_type, summary_length,
/// answer_format)` combination (SPEC_FULL.md §4.5). Prompt version strings
/// are opaque identifiers — their content lives outside this crate — but the
/// version tag participates in the dedup signature, so the selector itself
/// is load-bearing.
#[derive(Debug, Clone)]
pub struct PromptVersions {
    pub conference_long_qa: String,
    pub earnings_short_qa: String,
    pub earnings_long_qa: String,
    pub overview: String,
    pub judge: String,
}

impl Default for PromptVersions {
    fn default() -> Self {
        Self {
            conference_long_qa: "version_2".to_string(),
            earnings_short_qa: "version_5".to_string(),
            earnings_long_qa: "version_2".to_string(),
            overview: "version_1".to_string(),
            judge: "version_1".to_string(),
        }
    }
}

impl PromptVersions {
    /// Resolve the Q&A prompt version for a request, per the selector table
    /// in SPEC_FULL.md §4.5. Conference calls have no "short" form; a short
    /// request for a conference call routes to the long prompt.
    pub fn qa_version(&self, call_type: &str, summary_length: &str) -> &str {
        if call_type.eq_ignore_ascii_case("conference") {
            &self.conference_long_qa
        } else if summary_length.eq_ignore_ascii_case("short") {
            &self.earnings_short_qa
        } else {
            &self.earnings_long_qa
        }
    }
}

/// Immutable, validated service configuration.
///
/// Build via [`ServiceConfig::builder`]; construct directly only in tests.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Root directory under which transcript records, job directories, and
    /// the dedup index live. Default: `local_cache`.
    pub cache_root: PathBuf,

    /// Maximum accepted upload size, in bytes. `size == limit` is accepted;
    /// `size > limit` is rejected (SPEC_FULL.md §8 boundary behavior).
    pub max_upload_bytes: u64,

    /// Days a terminal job may sit before the cleanup worker removes it.
    pub retention_days: u32,

    /// Days before a job is removed regardless of its stage ("stuck" cleanup).
    pub force_cleanup_days: u32,

    /// Seconds between cleanup worker cycles.
    pub cleanup_interval_seconds: u64,

    /// `remaining_tokens` threshold below which the Stage Runner takes the
    /// single bounded backoff sleep before fan-out.
    pub remaining_tokens_threshold: u64,

    /// Wall-clock deadline, in seconds, for the combined Overview+Judge
    /// fan-out.
    pub fan_out_deadline_secs: u64,

    /// Per-call network timeout for the Model Client.
    pub model_timeout_secs: u64,

    /// HTTP listen address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,

    /// Allowed CORS origins. Empty means no cross-origin requests are
    /// permitted, matching the source system's default.
    pub cors_origins: Vec<String>,

    /// Bearer token / API key for the configured model provider.
    pub model_api_key: Option<String>,

    /// Base URL of the model provider's generation endpoint.
    pub model_base_url: String,

    pub prompt_versions: PromptVersions,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("cache_root", &self.cache_root)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("retention_days", &self.retention_days)
            .field("force_cleanup_days", &self.force_cleanup_days)
            .field("cleanup_interval_seconds", &self.cleanup_interval_seconds)
            .field(
                "remaining_tokens_threshold",
                &self.remaining_tokens_threshold,
            )
            .field("fan_out_deadline_secs", &self.fan_out_deadline_secs)
            .field("model_timeout_secs", &self.model_timeout_secs)
            .field("bind_addr", &self.bind_addr)
            .field("cors_origins", &self.cors_origins)
            .field(
                "model_api_key",
                &self.model_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("model_base_url", &self.model_base_url)
            .field("prompt_versions", &self.prompt_versions)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfigBuilder::default().build().expect("defaults are valid")
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }
}

/// Builder for [`ServiceConfig`]. Setters clamp values into a sane range
/// rather than rejecting them outright, matching the teacher's
/// `ConversionConfigBuilder` convention (e.g. its `.dpi()` clamp).
pub struct ServiceConfigBuilder {
    cache_root: PathBuf,
    max_upload_bytes: u64,
    retention_days: u32,
    force_cleanup_days: u32,
    cleanup_interval_seconds: u64,
    remaining_tokens_threshold: u64,
    fan_out_deadline_secs: u64,
    model_timeout_secs: u64,
    bind_addr: String,
    cors_origins: Vec<String>,
    model_api_key: Option<String>,
    model_base_url: String,
    prompt_versions: PromptVersions,
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("local_cache"),
            max_upload_bytes: 10 * 1024 * 1024,
            retention_days: 2,
            force_cleanup_days: 7,
            cleanup_interval_seconds: 6 * 60 * 60,
            remaining_tokens_threshold: 40_000,
            fan_out_deadline_secs: 5 * 60,
            model_timeout_secs: 120,
            bind_addr: "0.0.0.0:8080".to_string(),
            cors_origins: Vec::new(),
            model_api_key: None,
            model_base_url: "https://api.openai.com/v1".to_string(),
            prompt_versions: PromptVersions::default(),
        }
    }
}

impl ServiceConfigBuilder {
    pub fn cache_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_root = path.into();
        self
    }

    /// Size limit in megabytes; clamped to at least 1 MiB.
    pub fn max_upload_mb(mut self, mb: u64) -> Self {
        self.max_upload_bytes = mb.max(1) * 1024 * 1024;
        self
    }

    /// Clamped to at least 1 day.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days.max(1);
        self
    }

    pub fn force_cleanup_days(mut self, days: u32) -> Self {
        self.force_cleanup_days = days.max(1);
        self
    }

    /// Clamped to at least 1 second.
    pub fn cleanup_interval_seconds(mut self, secs: u64) -> Self {
        self.cleanup_interval_seconds = secs.max(1);
        self
    }

    pub fn remaining_tokens_threshold(mut self, tokens: u64) -> Self {
        self.remaining_tokens_threshold = tokens;
        self
    }

    /// Clamped to at least 1 second.
    pub fn fan_out_deadline_secs(mut self, secs: u64) -> Self {
        self.fan_out_deadline_secs = secs.max(1);
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.model_timeout_secs = secs.max(1);
        self
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn model_api_key(mut self, key: Option<String>) -> Self {
        self.model_api_key = key;
        self
    }

    pub fn model_base_url(mut self, url: impl Into<String>) -> Self {
        self.model_base_url = url.into();
        self
    }

    pub fn prompt_versions(mut self, versions: PromptVersions) -> Self {
        self.prompt_versions = versions;
        self
    }

    pub fn build(self) -> Result<ServiceConfig, AppError> {
        if self.force_cleanup_days < self.retention_days {
            return Err(AppError::InvalidConfig(format!(
                "force_cleanup_days ({}) must be >= retention_days ({})",
                self.force_cleanup_days, self.retention_days
            )));
        }
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(AppError::InvalidConfig(format!(
                "bind_addr '{}' is not a valid socket address",
                self.bind_addr
            )));
        }

        Ok(ServiceConfig {
            cache_root: self.cache_root,
            max_upload_bytes: self.max_upload_bytes,
            retention_days: self.retention_days,
            force_cleanup_days: self.force_cleanup_days,
            cleanup_interval_seconds: self.cleanup_interval_seconds,
            remaining_tokens_threshold: self.remaining_tokens_threshold,
            fan_out_deadline_secs: self.fan_out_deadline_secs,
            model_timeout_secs: self.model_timeout_secs,
            bind_addr: self.bind_addr,
            cors_origins: self.cors_origins,
            model_api_key: self.model_api_key,
            model_base_url: self.model_base_url,
            prompt_versions: self.prompt_versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let config = ServiceConfig::default();
        assert_eq!(config.retention_days, 2);
        assert_eq!(config.force_cleanup_days, 7);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn rejects_force_cleanup_shorter_than_retention() {
        let result = ServiceConfig::builder()
            .retention_days(7)
            .force_cleanup_days(2)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_bind_addr() {
        let result = ServiceConfig::builder().bind_addr("not-an-address").build();
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = ServiceConfig::builder()
            .model_api_key(Some("sk-super-secret".to_string()))
            .build()
            .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn qa_prompt_selector_routes_conference_short_to_long() {
        let versions = PromptVersions::default();
        assert_eq!(
            versions.qa_version("conference", "short"),
            versions.conference_long_qa
        );
        assert_eq!(
            versions.qa_version("earnings", "short"),
            versions.earnings_short_qa
        );
        assert_eq!(
            versions.qa_version("earnings", "long"),
            versions.earnings_long_qa
        );
    }
}
