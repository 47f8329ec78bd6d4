//! Job Registry: owns `<cache_root>/<job_id>/`, the per-job status file,
//! stage output artifacts, and the process-local lock and cancel-token
//! registries that serialize and interrupt work on a job.
//!
//! Grounded on `original_source/backend/src/utils/job_state.py`
//! (`JobStatusManager`): a per-job `Mutex` map behind a single meta-lock, a
//! `stages` merge that is one level deep, `updated_at` refreshed on every
//! write, and a class-level cancel-event registry reimagined here as a
//! `CancellationToken` map — following SPEC_FULL.md §9's design note against
//! module-level globals, this lives as fields of one `JobRegistry` value
//! held in `Arc` application state rather than statics.

use crate::atomic;
use crate::error::{AppError, StageError};
use crate::store::TranscriptInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One of the four stages tracked in `status.json`'s `stages` map.
pub const STAGE_VALIDATING: &str = "validating";
pub const STAGE_QA: &str = "q_a_summary";
pub const STAGE_OVERVIEW: &str = "overview_summary";
pub const STAGE_JUDGE: &str = "summary_evaluation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageState {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageState::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl From<StageError> for JobError {
    fn from(e: StageError) -> Self {
        JobError {
            code: e.code,
            message: e.message,
        }
    }
}

/// A job's persisted `status.json`.
///
/// Unknown fields are preserved through `#[serde(flatten)]` on `extra`
/// rather than rejected, per SPEC_FULL.md §9's "permissive deserialization"
/// design note — a status file written by a newer version of this service
/// still round-trips through an older one without data loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub transcript_name: String,
    pub current_stage: String,
    #[serde(default)]
    pub stages: HashMap<String, StageState>,
    pub percent_complete: u8,
    pub updated_at: DateTime<Utc>,
    pub input: TranscriptInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl JobStatus {
    pub fn new_initial(job_id: String, transcript_name: String, input: TranscriptInput) -> Self {
        let mut stages = HashMap::new();
        stages.insert(STAGE_VALIDATING.to_string(), StageState::Completed);
        stages.insert(STAGE_QA.to_string(), StageState::Pending);
        stages.insert(STAGE_OVERVIEW.to_string(), StageState::Pending);
        stages.insert(STAGE_JUDGE.to_string(), StageState::Pending);
        Self {
            job_id,
            transcript_name,
            current_stage: STAGE_QA.to_string(),
            stages,
            percent_complete: 10,
            updated_at: Utc::now(),
            input,
            error: None,
            warnings: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A partial update applied to `status.json` under the per-job lock.
///
/// `stages` is merged one level deep (only the named stages are touched);
/// every other field, when present, replaces the prior value outright.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub current_stage: Option<String>,
    pub stages: HashMap<String, StageState>,
    pub percent_complete: Option<u8>,
    pub error: Option<JobError>,
    pub clear_error: bool,
}

impl StatusPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_stage(mut self, stage: impl Into<String>) -> Self {
        self.current_stage = Some(stage.into());
        self
    }

    pub fn stage(mut self, name: &str, state: StageState) -> Self {
        self.stages.insert(name.to_string(), state);
        self
    }

    pub fn percent_complete(mut self, pct: u8) -> Self {
        self.percent_complete = Some(pct.min(100));
        self
    }

    pub fn error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Owns every job directory under `cache_root`, plus the process-local lock
/// map and cancel-token registry.
#[derive(Clone)]
pub struct JobRegistry {
    cache_root: PathBuf,
    meta: Arc<Mutex<Meta>>,
}

struct Meta {
    locks: HashMap<String, Arc<Mutex<()>>>,
    cancel_tokens: HashMap<String, CancellationToken>,
}

impl JobRegistry {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            meta: Arc::new(Mutex::new(Meta {
                locks: HashMap::new(),
                cancel_tokens: HashMap::new(),
            })),
        }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.cache_root.join(job_id)
    }

    fn status_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("status.json")
    }

    fn output_path(&self, job_id: &str, name: &str) -> PathBuf {
        self.job_dir(job_id).join(format!("{name}.json"))
    }

    async fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut meta = self.meta.lock().await;
        meta.locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The per-job lock used to serialize `status.json`/output mutations for
    /// `job_id`. Exposed so callers outside this module (the cleanup worker)
    /// can hold it across a read-then-delete sequence instead of racing the
    /// runner's own locked writes.
    pub async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.lock_for(job_id).await
    }

    /// Return this job's cancellation token, registering a fresh one if this
    /// is the first time it has been looked up.
    pub async fn cancel_token(&self, job_id: &str) -> CancellationToken {
        let mut meta = self.meta.lock().await;
        meta.cancel_tokens
            .entry(job_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    pub async fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancel_token(job_id).await.is_cancelled()
    }

    /// Create the job directory and write its initial `status.json`.
    pub async fn create(&self, status: JobStatus) -> Result<(), AppError> {
        let job_id = status.job_id.clone();
        let lock = self.lock_for(&job_id).await;
        let _guard = lock.lock().await;
        let path = self.status_path(&job_id);
        atomic::write_atomic(&path, &status)
            .await
            .map_err(|e| AppError::PersistError { path, source: e })
    }

    /// Best-effort status read: `None` on a missing or unparseable file.
    pub async fn read_status(&self, job_id: &str) -> Option<JobStatus> {
        atomic::read_or_default(&self.status_path(job_id)).await
    }

    /// Apply `patch` under the per-job lock: `stages` deep-merges one
    /// level, every other present field replaces the prior value, and
    /// `updated_at` always refreshes to now.
    pub async fn update_status(&self, job_id: &str, patch: StatusPatch) -> Result<(), AppError> {
        let lock = self.lock_for(job_id).await;
        let _guard = lock.lock().await;
        self.update_status_locked(job_id, patch).await
    }

    async fn update_status_locked(&self, job_id: &str, patch: StatusPatch) -> Result<(), AppError> {
        let path = self.status_path(job_id);
        let mut status: JobStatus =
            atomic::read_or_default(&path)
                .await
                .ok_or_else(|| AppError::StatusReadError {
                    job_id: job_id.to_string(),
                    detail: "status.json missing or unparseable".to_string(),
                })?;

        if let Some(stage) = patch.current_stage {
            status.current_stage = stage;
        }
        for (name, state) in patch.stages {
            status.stages.insert(name, state);
        }
        if let Some(pct) = patch.percent_complete {
            status.percent_complete = pct;
        }
        if let Some(error) = patch.error {
            status.error = Some(error);
        } else if patch.clear_error {
            status.error = None;
        }
        status.updated_at = Utc::now();

        atomic::write_atomic(&path, &status)
            .await
            .map_err(|e| AppError::PersistError { path, source: e })
    }

    pub async fn append_warning(&self, job_id: &str, message: impl Into<String>) -> Result<(), AppError> {
        let lock = self.lock_for(job_id).await;
        let _guard = lock.lock().await;
        let path = self.status_path(job_id);
        let mut status: JobStatus =
            atomic::read_or_default(&path)
                .await
                .ok_or_else(|| AppError::StatusReadError {
                    job_id: job_id.to_string(),
                    detail: "status.json missing or unparseable".to_string(),
                })?;
        status.warnings.push(message.into());
        status.updated_at = Utc::now();
        atomic::write_atomic(&path, &status)
            .await
            .map_err(|e| AppError::PersistError { path, source: e })
    }

    pub async fn write_output<T: Serialize + Sync>(
        &self,
        job_id: &str,
        name: &str,
        payload: &T,
    ) -> Result<(), AppError> {
        let path = self.output_path(job_id, name);
        atomic::write_atomic(&path, payload)
            .await
            .map_err(|e| AppError::PersistError { path, source: e })
    }

    pub async fn read_output<T: for<'de> Deserialize<'de>>(&self, job_id: &str, name: &str) -> Option<T> {
        atomic::read_or_default(&self.output_path(job_id, name)).await
    }

    /// Signal cancellation and eagerly transition the job to terminal
    /// `failed` with `error.code = "cancelled"`, marking any `running`
    /// sub-stage `failed`, then remove any materialized output artifacts —
    /// so a poller can never observe partial data after cancel returns.
    pub async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        self.cancel_token(job_id).await.cancel();

        let lock = self.lock_for(job_id).await;
        let _guard = lock.lock().await;
        let path = self.status_path(job_id);
        let mut status: JobStatus =
            atomic::read_or_default(&path)
                .await
                .ok_or_else(|| AppError::JobNotFound {
                    job_id: job_id.to_string(),
                })?;

        status.current_stage = "failed".to_string();
        status.error = Some(JobError {
            code: "cancelled".to_string(),
            message: "Cancelled by user".to_string(),
        });
        for state in status.stages.values_mut() {
            if matches!(state, StageState::Running) {
                *state = StageState::Failed;
            }
        }
        status.updated_at = Utc::now();
        atomic::write_atomic(&path, &status)
            .await
            .map_err(|e| AppError::PersistError { path: path.clone(), source: e })?;

        for name in ["q_a_summary", "overview_summary", "summary_evaluation"] {
            let out_path = self.output_path(job_id, name);
            let _ = tokio::fs::remove_file(&out_path).await;
        }

        Ok(())
    }

    pub fn cache_root(&self) -> &PathBuf {
        &self.cache_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AnswerFormat, CallType, SummaryLength, TranscriptInput};

    fn sample_input() -> TranscriptInput {
        TranscriptInput {
            call_type: CallType::Earnings,
            summary_length: SummaryLength::Long,
            answer_format: AnswerFormat::Prose,
            filename: "call.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        registry.create(status).await.unwrap();
        let read = registry.read_status("job1").await.unwrap();
        assert_eq!(read.job_id, "job1");
        assert_eq!(read.stages[STAGE_VALIDATING], StageState::Completed);
    }

    #[tokio::test]
    async fn update_status_merges_stages_one_level() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        registry.create(status).await.unwrap();

        registry
            .update_status(
                "job1",
                StatusPatch::new().stage(STAGE_QA, StageState::Running).percent_complete(25),
            )
            .await
            .unwrap();

        let read = registry.read_status("job1").await.unwrap();
        assert_eq!(read.stages[STAGE_QA], StageState::Running);
        // untouched stages survive the merge
        assert_eq!(read.stages[STAGE_OVERVIEW], StageState::Pending);
        assert_eq!(read.percent_complete, 25);
    }

    #[tokio::test]
    async fn append_warning_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        registry.create(status).await.unwrap();
        registry.append_warning("job1", "first").await.unwrap();
        registry.append_warning("job1", "second").await.unwrap();
        let read = registry.read_status("job1").await.unwrap();
        assert_eq!(read.warnings, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn cancel_removes_outputs_and_sets_terminal_failed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        registry.create(status).await.unwrap();
        registry
            .update_status("job1", StatusPatch::new().stage(STAGE_QA, StageState::Running))
            .await
            .unwrap();
        registry
            .write_output("job1", "q_a_summary", &serde_json::json!({"data": 1}))
            .await
            .unwrap();

        registry.cancel("job1").await.unwrap();

        let read = registry.read_status("job1").await.unwrap();
        assert_eq!(read.current_stage, "failed");
        assert_eq!(read.error.unwrap().code, "cancelled");
        assert_eq!(read.stages[STAGE_QA], StageState::Failed);
        assert!(registry.read_output::<Value>("job1", "q_a_summary").await.is_none());
        assert!(registry.is_cancelled("job1").await);
    }

    #[tokio::test]
    async fn cancel_missing_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let result = registry.cancel("does-not-exist").await;
        assert!(result.is_err());
    }
}
