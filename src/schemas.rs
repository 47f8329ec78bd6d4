//! Typed response schemas for each pipeline stage.
//!
//! `original_source` passed duck-typed dicts between the LLM client and the
//! workflow; SPEC_FULL.md §9 calls that out explicitly for replacement with
//! one explicit schema per stage. These are the `text_format` schemas the
//! [`crate::model_client::ModelClient`] validates provider output against,
//! and the `data` payload of each stage's output file.

use serde::{Deserialize, Serialize};

/// One analyst's question(s) and answer(s), prose variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystQaProse {
    pub name: String,
    pub firm: String,
    pub questions: Vec<QuestionProse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionProse {
    pub question: String,
    pub answer_summary: String,
}

/// One analyst's question(s) and answer(s), bullet variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystQaBullet {
    pub name: String,
    pub firm: String,
    pub questions: Vec<QuestionBullet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBullet {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<AnswerBullet>>,
    /// Legacy shape: a flat bullet list with no per-executive attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_summary: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerBullet {
    pub executive: String,
    pub answer_summary: Vec<String>,
}

/// One conference-call topic grouping several analyst Q&As.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicProse {
    pub topic: String,
    pub question_answers: Vec<AnalystQaProse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicBullet {
    pub topic: String,
    pub question_answers: Vec<AnalystQaBullet>,
}

/// The Q&A summary schema; exactly one of the four shapes is populated
/// depending on `(call_type, answer_format)`, selected before the Model
/// Client call — the Stage Runner knows statically which variant it asked
/// for and deserializes into that variant directly rather than probing all
/// four.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QaSummary {
    EarningsProse {
        title: String,
        analysts: Vec<AnalystQaProse>,
    },
    EarningsBullet {
        title: String,
        analysts: Vec<AnalystQaBullet>,
    },
    ConferenceProse {
        title: String,
        topics: Vec<TopicProse>,
    },
    ConferenceBullet {
        title: String,
        topics: Vec<TopicBullet>,
    },
}

impl QaSummary {
    pub fn title(&self) -> &str {
        match self {
            QaSummary::EarningsProse { title, .. }
            | QaSummary::EarningsBullet { title, .. }
            | QaSummary::ConferenceProse { title, .. }
            | QaSummary::ConferenceBullet { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveEntry {
    pub executive_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceOutlook {
    pub period_label: String,
    pub metric_name: String,
    pub metric_description: String,
}

/// The Overview stage's output schema (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overview {
    pub executives_list: Vec<ExecutiveEntry>,
    pub overview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_outlook: Option<Vec<GuidanceOutlook>>,
    /// Display title; absent overviews fall back to "Untitled" at the
    /// call site rather than being required here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeError {
    pub error: String,
    pub summary_text: String,
    pub transcript_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub metric_name: String,
    pub passed: bool,
    #[serde(default)]
    pub errors: Vec<JudgeError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub total_criteria: u32,
    pub passed_criteria: u32,
    pub failed_criteria: u32,
    pub overall_passed: bool,
    pub pass_rate: f64,
    pub evaluation_timestamp: String,
    pub evaluation_summary: String,
}

/// The Judge stage's output schema (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judge {
    pub evaluation_results: Vec<EvaluationResult>,
    pub overall_assessment: OverallAssessment,
}

/// Wraps every stage output file: `{ metadata, data }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput<T> {
    pub metadata: StageMetadata,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetadata {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_seconds: f64,
}
