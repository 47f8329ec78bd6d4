//! Stage Runner: executes the Q&A → parallel {Overview, Judge} pipeline for
//! one job, writing stage artifacts and status transitions as it goes.
//!
//! Grounded on two teacher-adjacent sources: the dual sequential/parallel
//! split of `convert.rs`'s `process_sequential_lazy`/`process_concurrent_lazy`
//! for the *shape* of "one gate stage, then N independent stages", and
//! `original_source/backend/src/services/summary_workflow.py` in full
//! (`_execute_qa_summary`, `_apply_exponential_backoff`,
//! `_execute_parallel_stages`) for the exact stage semantics — its
//! `ThreadPoolExecutor(2)` + `as_completed(timeout=300)` loop is reimplemented
//! here as two `tokio::spawn`ed tasks polled with `tokio::select!` against a
//! combined deadline and the job's [`tokio_util::sync::CancellationToken`].

use crate::error::{ModelClientError, StageError};
use crate::model_client::{GenerateRequest, ModelClient};
use crate::registry::{
    JobRegistry, StageState, StatusPatch, JobError, STAGE_JUDGE, STAGE_OVERVIEW, STAGE_QA,
};
use crate::schemas::{Judge, Overview, QaSummary, StageMetadata, StageOutput};
use crate::store::{AnswerFormat, CallType, TranscriptRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration the runner needs that isn't per-job: thresholds and
/// prompt-version identifiers, threaded in from [`crate::config::ServiceConfig`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub remaining_tokens_threshold: u64,
    pub fan_out_deadline: Duration,
    pub qa_max_output_tokens: u32,
    pub overview_max_output_tokens: u32,
    pub judge_max_output_tokens: u32,
    pub qa_prompt_version: String,
    pub overview_prompt_version: String,
    pub judge_prompt_version: String,
}

pub struct StageRunner {
    registry: JobRegistry,
    model_client: Arc<dyn ModelClient>,
}

impl StageRunner {
    pub fn new(registry: JobRegistry, model_client: Arc<dyn ModelClient>) -> Self {
        Self {
            registry,
            model_client,
        }
    }

    /// Spawn the pipeline for `job_id` in the background. Returns
    /// immediately; the HTTP handler never waits on this.
    pub fn spawn(&self, job_id: String, transcript: TranscriptRecord, settings: RunnerSettings) {
        let registry = self.registry.clone();
        let model_client = self.model_client.clone();
        tokio::spawn(async move {
            run_pipeline(&registry, model_client, &job_id, transcript, settings).await;
        });
    }
}

async fn run_pipeline(
    registry: &JobRegistry,
    model_client: Arc<dyn ModelClient>,
    job_id: &str,
    transcript: TranscriptRecord,
    settings: RunnerSettings,
) {
    let cancel_token = registry.cancel_token(job_id).await;

    // 1. Cancel preflight.
    if cancel_token.is_cancelled() {
        fail_cancelled(registry, job_id).await;
        return;
    }

    let call_type = transcript.input.call_type;

    // 2. Q&A Summary stage (sequential gate).
    registry
        .update_status(
            job_id,
            StatusPatch::new()
                .current_stage(STAGE_QA)
                .stage(STAGE_QA, StageState::Running)
                .percent_complete(25),
        )
        .await
        .ok();

    let qa_request = build_qa_request(&transcript, &settings);
    let qa_outcome = model_client.generate(qa_request).await;

    let (qa_summary, qa_text, remaining_tokens) = match qa_outcome {
        Ok(response) => match response.parsed_as::<QaSummary>() {
            Ok(parsed) => {
                let text = qa_summary_plain_text(&parsed);
                (parsed, text, response.remaining_tokens)
            }
            Err(ModelClientError::SchemaMismatch(detail)) => {
                registry
                    .update_status(job_id, StatusPatch::new().stage(STAGE_QA, StageState::Failed))
                    .await
                    .ok();
                registry
                    .append_warning(job_id, "Q&A summary failed: invalid JSON from LLM")
                    .await
                    .ok();
                finalize_failed(registry, job_id, StageError::llm_invalid_json(detail)).await;
                return;
            }
            Err(e) => {
                registry
                    .update_status(job_id, StatusPatch::new().stage(STAGE_QA, StageState::Failed))
                    .await
                    .ok();
                registry
                    .append_warning(job_id, format!("Q&A summary failed: {e}"))
                    .await
                    .ok();
                finalize_failed(registry, job_id, StageError::llm_summary_error(e.to_string())).await;
                return;
            }
        },
        Err(e) => {
            registry
                .update_status(job_id, StatusPatch::new().stage(STAGE_QA, StageState::Failed))
                .await
                .ok();
            registry
                .append_warning(job_id, format!("Q&A summary failed: {e}"))
                .await
                .ok();
            finalize_failed(registry, job_id, StageError::llm_summary_error(e.to_string())).await;
            return;
        }
    };

    registry
        .write_output(
            job_id,
            "q_a_summary",
            &StageOutput {
                metadata: StageMetadata {
                    model: "qa-model".to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_seconds: 0.0,
                },
                data: &qa_summary,
            },
        )
        .await
        .ok();
    registry
        .update_status(
            job_id,
            StatusPatch::new()
                .stage(STAGE_QA, StageState::Completed)
                .current_stage(STAGE_OVERVIEW)
                .percent_complete(55),
        )
        .await
        .ok();

    // 3. Rate-limit backoff: a single bounded sleep, never a retry.
    if let Some(remaining) = remaining_tokens {
        if remaining < settings.remaining_tokens_threshold {
            info!("remaining_tokens {remaining} below threshold, pausing before fan-out");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    // 4. Cancel check before fan-out.
    if cancel_token.is_cancelled() {
        registry
            .update_status(
                job_id,
                StatusPatch::new()
                    .stage(STAGE_OVERVIEW, StageState::Failed)
                    .stage(STAGE_JUDGE, StageState::Failed),
            )
            .await
            .ok();
        fail_cancelled(registry, job_id).await;
        return;
    }

    // 5. Parallel fan-out of Overview and Judge.
    run_fan_out(
        registry,
        model_client,
        job_id,
        &transcript,
        &qa_text,
        call_type,
        &settings,
        cancel_token.clone(),
    )
    .await;

    // 6. Finalization. A cancel observed during fan-out already drove both
    // stages to `Failed` (terminal), which would otherwise read as a normal
    // completion here — check the token first so a cancelled job always
    // ends `failed`/`cancelled`, never `completed`.
    if cancel_token.is_cancelled() {
        fail_cancelled(registry, job_id).await;
        return;
    }
    finalize(registry, job_id).await;
}

async fn fail_cancelled(registry: &JobRegistry, job_id: &str) {
    registry
        .update_status(
            job_id,
            StatusPatch::new()
                .current_stage("failed")
                .error(JobError {
                    code: "cancelled".to_string(),
                    message: "Cancelled by user".to_string(),
                }),
        )
        .await
        .ok();
}

async fn finalize_failed(registry: &JobRegistry, job_id: &str, error: StageError) {
    registry
        .update_status(
            job_id,
            StatusPatch::new().current_stage("failed").error(error.into()),
        )
        .await
        .ok();
}

/// After both fan-out tasks have terminated: complete the job if Q&A
/// completed and both Overview/Judge reached a terminal state, otherwise
/// leave/mark it failed.
async fn finalize(registry: &JobRegistry, job_id: &str) {
    let Some(status) = registry.read_status(job_id).await else {
        return;
    };
    let qa_done = status.stages.get(STAGE_QA).map(|s| s.is_completed()).unwrap_or(false);
    let overview_terminal = status.stages.get(STAGE_OVERVIEW).map(|s| s.is_terminal()).unwrap_or(false);
    let judge_terminal = status.stages.get(STAGE_JUDGE).map(|s| s.is_terminal()).unwrap_or(false);

    if qa_done && overview_terminal && judge_terminal {
        registry
            .update_status(
                job_id,
                StatusPatch::new().current_stage("completed").percent_complete(100),
            )
            .await
            .ok();
    } else {
        registry
            .update_status(job_id, StatusPatch::new().current_stage("failed"))
            .await
            .ok();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fan_out(
    registry: &JobRegistry,
    model_client: Arc<dyn ModelClient>,
    job_id: &str,
    transcript: &TranscriptRecord,
    qa_summary_text: &str,
    call_type: CallType,
    settings: &RunnerSettings,
    cancel_token: tokio_util::sync::CancellationToken,
) {
    registry
        .update_status(job_id, StatusPatch::new().stage(STAGE_OVERVIEW, StageState::Running))
        .await
        .ok();
    registry
        .update_status(job_id, StatusPatch::new().stage(STAGE_JUDGE, StageState::Running))
        .await
        .ok();

    let overview_request = build_overview_request(transcript, qa_summary_text, call_type, settings);
    let judge_request = build_judge_request(transcript, qa_summary_text, settings);

    let overview_client = model_client.clone();
    let mut overview_handle = tokio::spawn(async move { overview_client.generate(overview_request).await });
    let judge_client = model_client.clone();
    let mut judge_handle = tokio::spawn(async move { judge_client.generate(judge_request).await });

    let mut overview_done = false;
    let mut judge_done = false;

    let deadline = tokio::time::sleep(settings.fan_out_deadline);
    tokio::pin!(deadline);

    while !overview_done || !judge_done {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                if !overview_done {
                    overview_handle.abort();
                    registry.update_status(job_id, StatusPatch::new().stage(STAGE_OVERVIEW, StageState::Failed)).await.ok();
                    overview_done = true;
                }
                if !judge_done {
                    judge_handle.abort();
                    registry.update_status(job_id, StatusPatch::new().stage(STAGE_JUDGE, StageState::Failed)).await.ok();
                    judge_done = true;
                }
            }

            _ = &mut deadline => {
                if !overview_done {
                    overview_handle.abort();
                    registry.update_status(job_id, StatusPatch::new().stage(STAGE_OVERVIEW, StageState::Failed)).await.ok();
                    registry.append_warning(job_id, "Stage 'overview_summary' timed out").await.ok();
                    overview_done = true;
                }
                if !judge_done {
                    judge_handle.abort();
                    registry.update_status(job_id, StatusPatch::new().stage(STAGE_JUDGE, StageState::Failed)).await.ok();
                    registry.append_warning(job_id, "Stage 'summary_evaluation' timed out").await.ok();
                    judge_done = true;
                }
            }

            result = &mut overview_handle, if !overview_done => {
                overview_done = true;
                handle_overview_result(registry, job_id, result).await;
            }

            result = &mut judge_handle, if !judge_done => {
                judge_done = true;
                handle_judge_result(registry, job_id, result).await;
            }
        }
    }
}

async fn handle_overview_result(
    registry: &JobRegistry,
    job_id: &str,
    result: Result<Result<crate::model_client::GenerateResponse, ModelClientError>, tokio::task::JoinError>,
) {
    let outcome = match result {
        Ok(inner) => inner,
        Err(_) => return, // aborted; stage already marked failed by the caller
    };

    match outcome.and_then(|response| {
        response
            .parsed_as::<Overview>()
            .map(|parsed| (parsed, response.remaining_tokens))
    }) {
        Ok((overview, _)) => {
            registry
                .write_output(
                    job_id,
                    "overview_summary",
                    &StageOutput {
                        metadata: StageMetadata {
                            model: "overview-model".to_string(),
                            input_tokens: 0,
                            output_tokens: 0,
                            duration_seconds: 0.0,
                        },
                        data: overview,
                    },
                )
                .await
                .ok();
            registry
                .update_status(job_id, StatusPatch::new().stage(STAGE_OVERVIEW, StageState::Completed))
                .await
                .ok();
        }
        Err(e) => {
            registry
                .update_status(job_id, StatusPatch::new().stage(STAGE_OVERVIEW, StageState::Failed))
                .await
                .ok();
            registry
                .append_warning(job_id, format!("Stage 'overview_summary' failed: {e}"))
                .await
                .ok();
        }
    }
}

async fn handle_judge_result(
    registry: &JobRegistry,
    job_id: &str,
    result: Result<Result<crate::model_client::GenerateResponse, ModelClientError>, tokio::task::JoinError>,
) {
    let outcome = match result {
        Ok(inner) => inner,
        Err(_) => return,
    };

    match outcome.and_then(|response| response.parsed_as::<Judge>()) {
        Ok(judge) => {
            registry
                .write_output(
                    job_id,
                    "summary_evaluation",
                    &StageOutput {
                        metadata: StageMetadata {
                            model: "judge-model".to_string(),
                            input_tokens: 0,
                            output_tokens: 0,
                            duration_seconds: 0.0,
                        },
                        data: judge,
                    },
                )
                .await
                .ok();
            registry
                .update_status(job_id, StatusPatch::new().stage(STAGE_JUDGE, StageState::Completed))
                .await
                .ok();
        }
        Err(e) => {
            registry
                .update_status(job_id, StatusPatch::new().stage(STAGE_JUDGE, StageState::Failed))
                .await
                .ok();
            registry
                .append_warning(job_id, format!("Stage 'summary_evaluation' failed: {e}"))
                .await
                .ok();
        }
    }
}

/// Select the Q&A schema's JSON form (the model client validates against
/// this) based on `(call_type, answer_format)`, per SPEC_FULL.md §4.5.
fn qa_text_format(call_type: CallType, answer_format: AnswerFormat) -> Value {
    match (call_type, answer_format) {
        (CallType::Earnings, AnswerFormat::Prose) => serde_json::json!({"shape": "earnings_prose"}),
        (CallType::Earnings, AnswerFormat::Bullet) => serde_json::json!({"shape": "earnings_bullet"}),
        (CallType::Conference, AnswerFormat::Prose) => serde_json::json!({"shape": "conference_prose"}),
        (CallType::Conference, AnswerFormat::Bullet) => serde_json::json!({"shape": "conference_bullet"}),
    }
}

fn build_qa_request(transcript: &TranscriptRecord, settings: &RunnerSettings) -> GenerateRequest {
    let system_prompt = format!(
        "prompt_version={}; task=summarize Q&A transcript",
        settings.qa_prompt_version
    );
    GenerateRequest {
        system_prompt,
        user_prompt: transcript.transcripts.q_a.clone(),
        max_output_tokens: settings.qa_max_output_tokens,
        effort_level: None,
        text_format: Some(qa_text_format(
            transcript.input.call_type,
            transcript.input.answer_format,
        )),
    }
}

fn build_overview_request(
    transcript: &TranscriptRecord,
    qa_summary_text: &str,
    call_type: CallType,
    settings: &RunnerSettings,
) -> GenerateRequest {
    let system_prompt = format!(
        "prompt_version={}; task=call overview for {}",
        settings.overview_prompt_version,
        call_type.as_str()
    );
    let presentation = if transcript.transcripts.presentation.is_empty() {
        "No presentation section."
    } else {
        &transcript.transcripts.presentation
    };
    let user_prompt = format!("{presentation}\n\n---\n\n{qa_summary_text}");
    GenerateRequest {
        system_prompt,
        user_prompt,
        max_output_tokens: settings.overview_max_output_tokens,
        effort_level: None,
        text_format: Some(serde_json::json!({"shape": "overview"})),
    }
}

fn build_judge_request(
    transcript: &TranscriptRecord,
    qa_summary_text: &str,
    settings: &RunnerSettings,
) -> GenerateRequest {
    let system_prompt = format!("prompt_version={}; task=judge Q&A summary", settings.judge_prompt_version);
    let user_prompt = format!("{}\n\n---\n\n{}", transcript.transcripts.q_a, qa_summary_text);
    GenerateRequest {
        system_prompt,
        user_prompt,
        max_output_tokens: settings.judge_max_output_tokens,
        effort_level: None,
        text_format: Some(serde_json::json!({"shape": "judge"})),
    }
}

/// Derive a plain-text rendering of the Q&A summary for downstream prompts
/// (Overview and Judge both take the Q&A summary as context, not the raw
/// structured object).
fn qa_summary_plain_text(summary: &QaSummary) -> String {
    serde_json::to_string(summary).unwrap_or_default()
}

/// The display title for a completed job: the Overview's title if present,
/// otherwise "Untitled" (SPEC_FULL.md §4.5).
pub fn display_title(overview: Option<&Overview>, qa_summary: Option<&QaSummary>) -> String {
    if let Some(title) = overview.and_then(|o| o.title.as_deref()) {
        return title.to_string();
    }
    if let Some(qa) = qa_summary {
        return qa.title().to_string();
    }
    "Untitled".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_text_format_routes_by_call_type_and_answer_format() {
        let earnings_prose = qa_text_format(CallType::Earnings, AnswerFormat::Prose);
        assert_eq!(earnings_prose["shape"], "earnings_prose");
        let conference_bullet = qa_text_format(CallType::Conference, AnswerFormat::Bullet);
        assert_eq!(conference_bullet["shape"], "conference_bullet");
    }

    #[test]
    fn display_title_prefers_overview_title() {
        let overview = Overview {
            executives_list: vec![],
            overview: "text".to_string(),
            guidance_outlook: None,
            title: Some("Q2 Call".to_string()),
        };
        assert_eq!(display_title(Some(&overview), None), "Q2 Call");
    }

    #[test]
    fn display_title_falls_back_to_untitled() {
        assert_eq!(display_title(None, None), "Untitled");
    }

    #[tokio::test]
    async fn cancel_after_fan_out_finalizes_failed_not_completed() {
        use crate::registry::JobStatus;
        use crate::store::{SummaryLength, TranscriptInput};

        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(dir.path());
        let input = TranscriptInput {
            call_type: CallType::Earnings,
            summary_length: SummaryLength::Long,
            answer_format: AnswerFormat::Prose,
            filename: "call.pdf".to_string(),
        };
        let status = JobStatus::new_initial("job1".into(), "call.json".into(), input);
        registry.create(status).await.unwrap();

        // Simulate the state left behind by a cancel observed mid fan-out:
        // Q&A completed, both fan-out stages driven to Failed (terminal).
        registry
            .update_status(
                "job1",
                StatusPatch::new()
                    .stage(STAGE_QA, StageState::Completed)
                    .stage(STAGE_OVERVIEW, StageState::Failed)
                    .stage(STAGE_JUDGE, StageState::Failed),
            )
            .await
            .unwrap();

        let cancel_token = registry.cancel_token("job1").await;
        cancel_token.cancel();

        // This mirrors run_pipeline's post-fan-out guard: a cancelled token
        // must route to fail_cancelled, never to finalize, even though the
        // stage snapshot alone would look like a normal completion.
        if cancel_token.is_cancelled() {
            fail_cancelled(&registry, "job1").await;
        } else {
            finalize(&registry, "job1").await;
        }

        let read = registry.read_status("job1").await.unwrap();
        assert_eq!(read.current_stage, "failed");
        assert_eq!(read.error.unwrap().code, "cancelled");
    }
}
