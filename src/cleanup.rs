//! Cleanup Worker: a periodic background task that garbage-collects stuck
//! and finished job directories and prunes the dedup index.
//!
//! Grounded on `original_source/backend/src/utils/cache_cleanup.py`
//! (`_run_cleanup_cycle` / `_start_cleanup_thread`): scan every direct child
//! of the cache directory under its per-job lock, stage stuck and aged
//! terminal jobs for deletion, delete them under their locks, then prune the
//! dedup index against the surviving active set. The daemon thread + bare
//! `time.sleep` loop becomes a `tokio::spawn`ed task with `tokio::time::sleep`.

use crate::dedup::DedupIndex;
use crate::registry::JobRegistry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub retention_days: u32,
    pub force_cleanup_days: u32,
    pub interval: Duration,
    /// Delay before the first cycle, so cleanup doesn't compete with a
    /// cold-start workload.
    pub startup_delay: Duration,
}

/// Spawn the cleanup worker as a background task. Returns immediately; the
/// worker runs until the process exits. `dedup` is shared with the HTTP
/// handlers via `Arc`, so it is taken by reference-counted handle here
/// rather than owned outright.
pub fn spawn(registry: JobRegistry, dedup: Arc<DedupIndex>, settings: CleanupSettings) {
    tokio::spawn(async move {
        tokio::time::sleep(settings.startup_delay).await;
        loop {
            run_cleanup_cycle(&registry, &dedup, &settings).await;
            tokio::time::sleep(settings.interval).await;
        }
    });
}

/// One cleanup cycle: identify, delete, and prune the dedup index.
/// A failure scanning or deleting one job directory does not abort the
/// cycle — the remaining jobs are still processed.
pub async fn run_cleanup_cycle(registry: &JobRegistry, dedup: &DedupIndex, settings: &CleanupSettings) {
    info!("cache cleanup cycle started");

    let cache_root = registry.cache_root().clone();
    if let Err(e) = tokio::fs::create_dir_all(&cache_root).await {
        warn!("cache cleanup: failed to ensure cache dir exists: {e}");
        return;
    }

    let now = Utc::now();
    let normal_cutoff = now - ChronoDuration::days(settings.retention_days as i64);
    let force_cutoff = now - ChronoDuration::days(settings.force_cleanup_days as i64);

    let mut entries = match tokio::fs::read_dir(&cache_root).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cache cleanup: failed to list {}: {e}", cache_root.display());
            return;
        }
    };

    let mut active_job_ids = HashSet::new();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("cache cleanup: failed to read next dir entry: {e}");
                break;
            }
        };

        let file_type = match entry.file_type().await {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if !file_type.is_dir() {
            continue;
        }

        let job_id = entry.file_name().to_string_lossy().into_owned();
        let job_dir = entry.path();

        // Hold this job's lock across the status read and the deletion
        // decision so the scan never races a live runner update, and so
        // the eventual `remove_dir_all` is the same lock the runner uses
        // for its own writes (SPEC_FULL.md §4.7/§5).
        let lock = registry.job_lock(&job_id).await;
        let _guard = lock.lock().await;

        let last_updated = job_last_updated(registry, &job_id, &job_dir).await;

        let stuck = last_updated < force_cutoff;
        let finished_and_aged = !stuck && {
            let is_terminal = registry
                .read_status(&job_id)
                .await
                .map(|s| matches!(s.current_stage.as_str(), "completed" | "failed" | "cancelled"))
                .unwrap_or(false);
            last_updated < normal_cutoff && is_terminal
        };

        if stuck || finished_and_aged {
            if stuck {
                info!("staging STUCK job for deletion (older than {} days): {job_id}", settings.force_cleanup_days);
            } else {
                info!("staging finished job for deletion: {job_id}");
            }
            if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
                warn!("cache cleanup: failed to remove {}: {e}", job_dir.display());
                active_job_ids.insert(job_id);
            } else {
                info!("cache cleanup: removed job_dir={}", job_dir.display());
            }
        } else {
            active_job_ids.insert(job_id);
        }
    }

    dedup.prune(&active_job_ids).await;

    info!("cache cleanup cycle finished");
}

/// `updated_at` from `status.json` if parseable, else the directory's mtime.
async fn job_last_updated(registry: &JobRegistry, job_id: &str, job_dir: &Path) -> DateTime<Utc> {
    if let Some(status) = registry.read_status(job_id).await {
        return status.updated_at;
    }
    match tokio::fs::metadata(job_dir).await.and_then(|m| m.modified()) {
        Ok(mtime) => DateTime::<Utc>::from(mtime),
        Err(_) => Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{JobStatus, StageState, StatusPatch, STAGE_QA};
    use crate::store::{AnswerFormat, CallType, SummaryLength, TranscriptInput};

    fn sample_input() -> TranscriptInput {
        TranscriptInput {
            call_type: CallType::Earnings,
            summary_length: SummaryLength::Long,
            answer_format: AnswerFormat::Prose,
            filename: "call.pdf".to_string(),
        }
    }

    fn settings() -> CleanupSettings {
        CleanupSettings {
            retention_days: 2,
            force_cleanup_days: 7,
            interval: Duration::from_secs(3600),
            startup_delay: Duration::from_secs(0),
        }
    }

    #[tokio::test]
    async fn stuck_job_is_removed_regardless_of_stage() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let dedup = DedupIndex::new(dir.path());

        let mut status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        status.updated_at = Utc::now() - ChronoDuration::days(8);
        registry.create(status).await.unwrap();
        registry
            .update_status("job1", StatusPatch::new().stage(STAGE_QA, StageState::Running))
            .await
            .unwrap();
        // update_status refreshes updated_at to now, so bypass it by writing directly.
        let mut status = registry.read_status("job1").await.unwrap();
        status.updated_at = Utc::now() - ChronoDuration::days(8);
        crate::atomic::write_atomic(&dir.path().join("job1/status.json"), &status)
            .await
            .unwrap();

        dedup.put("sig1", "job1").await;

        run_cleanup_cycle(&registry, &dedup, &settings()).await;

        assert!(!registry.job_dir("job1").exists());
        assert!(dedup.get("sig1").await.is_none());
    }

    #[tokio::test]
    async fn active_job_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let dedup = DedupIndex::new(dir.path());

        let status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        registry.create(status).await.unwrap();

        run_cleanup_cycle(&registry, &dedup, &settings()).await;

        assert!(registry.job_dir("job1").exists());
    }

    #[tokio::test]
    async fn terminal_job_within_retention_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let dedup = DedupIndex::new(dir.path());

        let mut status = JobStatus::new_initial("job1".into(), "call.json".into(), sample_input());
        status.current_stage = "completed".to_string();
        registry.create(status).await.unwrap();

        run_cleanup_cycle(&registry, &dedup, &settings()).await;

        assert!(registry.job_dir("job1").exists());
    }
}
