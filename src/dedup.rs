//! Dedup Index: maps a content+configuration signature to a job id so that
//! resubmitting the same transcript and parameters reuses a completed job
//! instead of re-running the pipeline.
//!
//! Grounded on `original_source/backend/src/utils/job_creation.py`
//! (`_compute_signature`, `_can_reuse_job`, `_read_job_index` /
//! `_write_job_index`): the whole map is rewritten atomically on update,
//! readers tolerate a missing or malformed file as an empty map, and a
//! cache hit is only trusted after validating the target job is actually
//! reusable.

use crate::atomic;
use crate::registry::JobRegistry;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// A dedup signature: the first 32 hex chars of
/// `SHA-1("content_hash | call_type | summary_length | prompt_sig | answer_format")`.
pub fn compute_signature(
    content_hash: &str,
    call_type: &str,
    summary_length: &str,
    prompt_sig: &str,
    answer_format: &str,
) -> String {
    let raw = format!("{content_hash}|{call_type}|{summary_length}|{prompt_sig}|{answer_format}");
    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// A `q_a_prompt_ver | overview_prompt_ver | judge_prompt_ver` triple.
pub fn prompt_signature(qa_version: &str, overview_version: &str, judge_version: &str) -> String {
    format!("{qa_version}|{overview_version}|{judge_version}")
}

/// The on-disk dedup index: `signature -> job_id`, rewritten whole on every
/// update. Serialized behind a `Mutex` since updates are read-modify-write
/// over the whole file — no per-entry locking, last-writer-wins is
/// acceptable per SPEC_FULL.md §5 because a stale entry is validated before
/// reuse.
pub struct DedupIndex {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DedupIndex {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        let cache_root = cache_root.into();
        Self {
            path: cache_root.join("job_index.json"),
            lock: Mutex::new(()),
        }
    }

    /// Read the whole index. Missing or malformed content reads as an empty
    /// map.
    pub async fn read(&self) -> HashMap<String, String> {
        atomic::read_or_default(&self.path).await.unwrap_or_default()
    }

    /// Look up `signature`, without validating reusability — callers should
    /// use [`DedupIndex::find_reusable`] when acting on the result.
    pub async fn get(&self, signature: &str) -> Option<String> {
        self.read().await.get(signature).cloned()
    }

    /// `put` always overwrites any existing mapping for `signature`.
    pub async fn put(&self, signature: &str, job_id: &str) {
        let _guard = self.lock.lock().await;
        let mut index = self.read().await;
        index.insert(signature.to_string(), job_id.to_string());
        let _ = atomic::write_atomic(&self.path, &index).await;
    }

    /// Look up `signature` and return its job id only if the target job
    /// passes the reusability predicate (§4.3): `status.json` parses, all
    /// three stages are `completed`, and all three output files exist and
    /// parse as JSON objects. A stale or partially-completed target behaves
    /// as a cache miss rather than an error.
    pub async fn find_reusable(&self, signature: &str, registry: &JobRegistry) -> Option<String> {
        let job_id = self.get(signature).await?;
        if is_reusable(&job_id, registry).await {
            Some(job_id)
        } else {
            None
        }
    }

    /// Drop every entry whose job id is not in `active_job_ids`. Rewrites
    /// the file only if something changed.
    pub async fn prune(&self, active_job_ids: &std::collections::HashSet<String>) {
        let _guard = self.lock.lock().await;
        let index = self.read().await;
        let original_len = index.len();
        let pruned: HashMap<String, String> = index
            .into_iter()
            .filter(|(_, job_id)| active_job_ids.contains(job_id))
            .collect();
        if pruned.len() != original_len {
            let _ = atomic::write_atomic(&self.path, &pruned).await;
        }
    }
}

async fn is_reusable(job_id: &str, registry: &JobRegistry) -> bool {
    let Some(status) = registry.read_status(job_id).await else {
        return false;
    };

    let all_completed = ["q_a_summary", "overview_summary", "summary_evaluation"]
        .iter()
        .all(|stage| status.stages.get(*stage).map(|s| s.is_completed()).unwrap_or(false));
    if !all_completed {
        return false;
    }

    for name in ["q_a_summary", "overview_summary", "summary_evaluation"] {
        match registry.read_output::<Value>(job_id, name).await {
            Some(Value::Object(_)) => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_32_hex_chars() {
        let sig = compute_signature("hash", "earnings", "long", "v1|v1|v1", "prose");
        assert_eq!(sig.len(), 32);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identical_inputs_yield_identical_signatures() {
        let a = compute_signature("hash", "earnings", "long", "v1|v1|v1", "prose");
        let b = compute_signature("hash", "earnings", "long", "v1|v1|v1", "prose");
        assert_eq!(a, b);
    }

    #[test]
    fn differing_answer_format_changes_signature() {
        let prose = compute_signature("hash", "earnings", "long", "v1|v1|v1", "prose");
        let bullet = compute_signature("hash", "earnings", "long", "v1|v1|v1", "bullet");
        assert_ne!(prose, bullet);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::new(dir.path());
        index.put("sig1", "job1").await;
        assert_eq!(index.get("sig1").await, Some("job1".to_string()));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::new(dir.path());
        assert!(index.read().await.is_empty());
    }

    #[tokio::test]
    async fn put_overwrites_existing_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::new(dir.path());
        index.put("sig1", "job1").await;
        index.put("sig1", "job2").await;
        assert_eq!(index.get("sig1").await, Some("job2".to_string()));
    }

    #[tokio::test]
    async fn prune_drops_entries_for_inactive_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::new(dir.path());
        index.put("sig1", "job1").await;
        index.put("sig2", "job2").await;
        let mut active = std::collections::HashSet::new();
        active.insert("job1".to_string());
        index.prune(&active).await;
        let remaining = index.read().await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("sig1"));
    }
}
