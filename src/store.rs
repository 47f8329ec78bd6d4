//! Transcript Store: persists segmented transcripts keyed by filename and
//! computes the content hash that downstream dedup keys off of.
//!
//! Grounded on the teacher's `convert_to_file` atomic-write pattern (now
//! centralised in [`crate::atomic`]) and on
//! `original_source/backend/src/utils/pdf_processor.py::process_pdf` for the
//! persisted record shape — filename used literally as `<name>.json`,
//! content hash computed over the trimmed, newline-joined transcript halves.

use crate::atomic;
use crate::error::AppError;
use crate::segmenter::SegmentedTranscript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Earnings,
    Conference,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Earnings => "earnings",
            CallType::Conference => "conference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    Long,
}

impl SummaryLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Long => "long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Prose,
    Bullet,
}

impl AnswerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerFormat::Prose => "prose",
            AnswerFormat::Bullet => "bullet",
        }
    }
}

/// The user-supplied parameters accompanying a submitted PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptInput {
    pub call_type: CallType,
    pub summary_length: SummaryLength,
    pub answer_format: AnswerFormat,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHalves {
    pub presentation: String,
    pub q_a: String,
}

/// A persisted transcript record: one object per uploaded filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub validated_at: DateTime<Utc>,
    pub input: TranscriptInput,
    pub transcripts: TranscriptHalves,
    pub content_hash: String,
    pub transcript_name: String,
}

/// Persists segmented transcripts under `<cache_root>/<name>.json`.
pub struct TranscriptStore {
    cache_root: PathBuf,
}

impl TranscriptStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn path_for(&self, transcript_name: &str) -> PathBuf {
        self.cache_root.join(transcript_name)
    }

    /// Persist `segmented` under the base name derived from `input.filename`.
    ///
    /// If a record already exists at the target path and its `content_hash`
    /// matches the freshly computed one, the existing file is left
    /// untouched (not rewritten); otherwise it is overwritten.
    pub async fn persist(
        &self,
        input: TranscriptInput,
        segmented: SegmentedTranscript,
    ) -> Result<TranscriptRecord, AppError> {
        let base_name = base_name(&input.filename);
        let transcript_name = format!("{base_name}.json");
        let path = self.path_for(&transcript_name);

        let content_hash = compute_content_hash(&segmented.presentation, &segmented.q_a);

        if let Some(existing) = atomic::read_or_default::<TranscriptRecord>(&path).await {
            if existing.content_hash == content_hash {
                return Ok(existing);
            }
        }

        let record = TranscriptRecord {
            validated_at: Utc::now(),
            input,
            transcripts: TranscriptHalves {
                presentation: segmented.presentation,
                q_a: segmented.q_a,
            },
            content_hash,
            transcript_name,
        };

        atomic::write_atomic(&path, &record)
            .await
            .map_err(|e| AppError::PersistError {
                path: path.clone(),
                source: e,
            })?;

        Ok(record)
    }

    pub async fn read(&self, transcript_name: &str) -> Option<TranscriptRecord> {
        atomic::read_or_default(&self.path_for(transcript_name)).await
    }
}

/// Strip any directory components from `filename`, preserving case and
/// internal spaces. The `.json` suffix used for the persisted record is
/// appended by the caller, not stripped here.
fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// SHA-256 over trimmed `presentation + "\n\n" + q_a`, hex-encoded.
pub fn compute_content_hash(presentation: &str, q_a: &str) -> String {
    let combined = format!("{}\n\n{}", presentation.trim(), q_a.trim());
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> TranscriptInput {
        TranscriptInput {
            call_type: CallType::Earnings,
            summary_length: SummaryLength::Long,
            answer_format: AnswerFormat::Prose,
            filename: "Q2 Earnings Call.pdf".to_string(),
        }
    }

    #[test]
    fn base_name_preserves_case_and_spaces() {
        assert_eq!(base_name("My Folder/Q2 Call.pdf"), "Q2 Call.pdf");
        assert_eq!(base_name("Q2 Call.pdf"), "Q2 Call.pdf");
    }

    #[test]
    fn content_hash_is_stable_for_identical_input() {
        let a = compute_content_hash("pres", "qa");
        let b = compute_content_hash("pres", "qa");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_trims_whitespace() {
        let a = compute_content_hash("pres", "qa");
        let b = compute_content_hash("  pres  ", "  qa  ");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_on_changed_content() {
        let a = compute_content_hash("pres", "qa");
        let b = compute_content_hash("pres", "qa2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn persist_reuses_existing_record_on_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        let segmented = SegmentedTranscript {
            presentation: "pres text".to_string(),
            q_a: "qa text".to_string(),
        };
        let first = store
            .persist(sample_input(), segmented.clone())
            .await
            .unwrap();
        let second = store.persist(sample_input(), segmented).await.unwrap();
        assert_eq!(first.validated_at, second.validated_at);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn persist_overwrites_on_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        let first = store
            .persist(
                sample_input(),
                SegmentedTranscript {
                    presentation: "v1".to_string(),
                    q_a: "qa".to_string(),
                },
            )
            .await
            .unwrap();
        let second = store
            .persist(
                sample_input(),
                SegmentedTranscript {
                    presentation: "v2".to_string(),
                    q_a: "qa".to_string(),
                },
            )
            .await
            .unwrap();
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.transcripts.presentation, "v2");
    }
}
