//! The per-review state machine.
//!
//! One job moves a review pending -> processing -> completed | failed. The
//! steps are: fetch the diff, call the LLM, parse and normalize, persist the
//! document with its suggestions, post the comment, and settle the webhook
//! event. Persistence is atomic, so a redelivered job either reruns the whole
//! pipeline or, when the review is already completed, resumes at the comment
//! step from stored rows.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{LlmError, ScmError};
use crate::llm::{
    self, ChatRequest, ClientPool, Message, PromptData, TokenUsage, REVIEW_SYSTEM_PROMPT,
};
use crate::metrics;
use crate::output::{OutputContext, OutputMetadata, ReviewDocument};
use crate::parser::{self, NormalizedReview};
use crate::queue::ReviewJob;
use crate::scm::{format_review_comment, ScmClientFactory};
use crate::store::{
    EventStatus, LlmProviderConfig, ReviewContext, ReviewStatus, ReviewStore, StoreError,
    UsageRecord, UsageStatus,
};

use super::{JobHandler, WorkerError};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 4096;

/// Drives one review job through the full pipeline.
pub struct ReviewHandler {
    store: Arc<dyn ReviewStore>,
    scm: Arc<dyn ScmClientFactory>,
    llm_pool: Arc<ClientPool>,
}

#[async_trait]
impl JobHandler for ReviewHandler {
    async fn handle(&self, job: &ReviewJob) -> Result<(), WorkerError> {
        self.process(job.review_id).await
    }
}

impl ReviewHandler {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        scm: Arc<dyn ScmClientFactory>,
        llm_pool: Arc<ClientPool>,
    ) -> Self {
        Self {
            store,
            scm,
            llm_pool,
        }
    }

    /// Processes one review end to end.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Transient`] for failures redelivery can fix and
    /// [`WorkerError::Permanent`] for those it cannot. A comment-post failure
    /// is transient even though the review is already completed; the retry
    /// resumes at the comment step without re-running the LLM.
    pub async fn process(&self, review_id: i64) -> Result<(), WorkerError> {
        let started = Instant::now();

        let ctx = self.store.load_context(review_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => WorkerError::Permanent(e.to_string()),
            other => WorkerError::Transient(other.to_string()),
        })?;

        match ctx.review.current_status() {
            ReviewStatus::Completed if ctx.review.comment_posted => {
                debug!(review_id, "review already completed and commented, nothing to do");
                return Ok(());
            }
            ReviewStatus::Completed => {
                info!(review_id, "review completed but comment missing, resuming");
                return self.resume_comment(&ctx).await;
            }
            // Pending runs fresh; failed and stuck-processing rows are
            // reprocessed when the queue redelivers their job.
            _ => {}
        }

        let Some(provider) = ctx.provider.clone() else {
            let message = format!(
                "repository {} has no usable LLM provider",
                ctx.repository.id
            );
            self.fail_review(review_id, ctx.review.webhook_event_id, &message)
                .await;
            return Err(WorkerError::Permanent(message));
        };

        self.store
            .mark_processing(review_id)
            .await
            .map_err(|e| WorkerError::Transient(e.to_string()))?;

        let scm = self.scm.client_for(&ctx.repository);

        // Step A: fetch the diff.
        let diff = match scm
            .fetch_diff(ctx.repository.external_id, ctx.review.change_iid)
            .await
        {
            Ok(diff) => diff,
            Err(e) => {
                let message = format!("diff fetch failed: {e}");
                self.fail_review(review_id, ctx.review.webhook_event_id, &message)
                    .await;
                return Err(match e {
                    ScmError::EmptyDiff { .. } => WorkerError::Permanent(message),
                    _ => WorkerError::Transient(message),
                });
            }
        };
        debug!(review_id, diff_bytes = diff.len(), "fetched merge request diff");

        // Step B: call the LLM with the resolved prompt. The review is
        // already marked failed inside call_llm on error.
        let (raw_response, model, usage, llm_duration_ms, prompt_source) =
            match self.call_llm(&ctx, &provider, diff).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("LLM request failed: {e}");
                    return Err(classify_llm_error(&e, message));
                }
            };

        // Step C: parse and normalize the response.
        let normalized = match parser::parse_and_normalize(&raw_response) {
            Ok(review) => review,
            Err(e) => {
                let message = format!("response parsing failed: {e}");
                self.fail_review(review_id, ctx.review.webhook_event_id, &message)
                    .await;
                return Err(WorkerError::Permanent(message));
            }
        };
        if normalized.fallback_used {
            metrics::record_parser_fallback();
        }

        // Build the versioned document.
        let document = ReviewDocument::build(
            &normalized,
            OutputContext {
                repository: ctx.repository.name.clone(),
                change_iid: ctx.review.change_iid,
                change_title: ctx.review.title.clone(),
                provider: provider.name.clone(),
                model,
            },
            OutputMetadata {
                prompt_source: prompt_source.to_string(),
                fallback_used: normalized.fallback_used,
                total_tokens: Some(usage.total_tokens as i64),
                duration_ms: llm_duration_ms,
            },
        );
        let result_json = document.render().map_err(|e| {
            WorkerError::Permanent(format!("document serialization failed: {e}"))
        })?;

        // Step D: persist document and suggestions atomically.
        if let Err(e) = self
            .store
            .save_completed(review_id, &normalized, &raw_response, &result_json)
            .await
        {
            let message = format!("persisting review result failed: {e}");
            self.fail_review(review_id, ctx.review.webhook_event_id, &message)
                .await;
            return Err(WorkerError::Transient(message));
        }

        info!(
            review_id,
            score = normalized.score,
            suggestions = normalized.suggestions.len(),
            fallback = normalized.fallback_used,
            duration_ms = started.elapsed().as_millis() as u64,
            "review completed"
        );

        // Step E: post the comment. The review data is durable at this point,
        // so a failure here propagates for retry rather than marking the
        // review failed; a duplicate comment beats a lost notification.
        let comment = format_review_comment(&normalized);
        scm.post_comment(ctx.repository.external_id, ctx.review.change_iid, &comment)
            .await
            .map_err(|e| WorkerError::Transient(format!("comment post failed: {e}")))?;

        if let Err(e) = self.store.set_comment_posted(review_id).await {
            warn!(review_id, error = %e, "failed to record comment_posted flag");
        }

        // Step F: settle the originating webhook event, best-effort.
        self.settle_event(ctx.review.webhook_event_id, EventStatus::Completed, None)
            .await;

        Ok(())
    }

    /// Re-renders and posts the comment for an already-completed review.
    ///
    /// Rebuilds the normalized form from stored rows so the LLM is never
    /// called twice for the same result.
    async fn resume_comment(&self, ctx: &ReviewContext) -> Result<(), WorkerError> {
        let review_id = ctx.review.id;
        let records = self
            .store
            .load_suggestions(review_id)
            .await
            .map_err(|e| WorkerError::Transient(e.to_string()))?;

        let normalized = NormalizedReview {
            summary: ctx
                .review
                .summary
                .clone()
                .unwrap_or_else(|| crate::parser::DEFAULT_SUMMARY.to_string()),
            score: ctx.review.score.unwrap_or(0),
            suggestions: records.iter().map(|r| r.to_normalized()).collect(),
            fallback_used: false,
        };

        let comment = format_review_comment(&normalized);
        let scm = self.scm.client_for(&ctx.repository);
        scm.post_comment(ctx.repository.external_id, ctx.review.change_iid, &comment)
            .await
            .map_err(|e| WorkerError::Transient(format!("comment post failed: {e}")))?;

        if let Err(e) = self.store.set_comment_posted(review_id).await {
            warn!(review_id, error = %e, "failed to record comment_posted flag");
        }
        self.settle_event(ctx.review.webhook_event_id, EventStatus::Completed, None)
            .await;

        Ok(())
    }

    /// Step B proper: resolve the prompt, pick the pooled client, call it,
    /// and log usage whichever way the call goes.
    async fn call_llm(
        &self,
        ctx: &ReviewContext,
        provider: &LlmProviderConfig,
        diff: String,
    ) -> Result<(String, String, TokenUsage, u64, &'static str), LlmError> {
        let client = self.llm_pool.get_or_create(provider)?;

        let (template, source) = llm::resolve_template(
            ctx.repository.review_prompt.as_deref(),
            ctx.project_prompt.as_deref(),
        );
        let prompt = llm::render(
            &template,
            &PromptData {
                diff,
                title: ctx.review.title.clone(),
                source_branch: ctx.review.source_branch.clone(),
                target_branch: ctx.review.target_branch.clone(),
            },
        );

        let model = if provider.model.is_empty() {
            client.default_model().to_string()
        } else {
            provider.model.clone()
        };

        let request = ChatRequest::new(
            model.clone(),
            vec![Message::system(REVIEW_SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(TEMPERATURE)
        .with_max_tokens(MAX_TOKENS);

        let call_started = Instant::now();
        let result = client.chat(request).await;
        let duration_ms = call_started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                metrics::record_llm_request(
                    &provider.provider_type,
                    "success",
                    response.usage.prompt_tokens as u64,
                    response.usage.completion_tokens as u64,
                );
                self.log_usage(ctx, provider, &model, UsageStatus::Success, &response.usage, duration_ms, None)
                    .await;
                Ok((
                    response.content,
                    response.model,
                    response.usage,
                    duration_ms,
                    source.as_str(),
                ))
            }
            Err(e) => {
                metrics::record_llm_request(&provider.provider_type, "failed", 0, 0);
                self.log_usage(
                    ctx,
                    provider,
                    &model,
                    UsageStatus::Failed,
                    &TokenUsage::default(),
                    duration_ms,
                    Some(e.to_string()),
                )
                .await;
                let message = format!("LLM request failed: {e}");
                self.fail_review(ctx.review.id, ctx.review.webhook_event_id, &message)
                    .await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_usage(
        &self,
        ctx: &ReviewContext,
        provider: &LlmProviderConfig,
        model: &str,
        status: UsageStatus,
        usage: &TokenUsage,
        duration_ms: u64,
        error_message: Option<String>,
    ) {
        let record = UsageRecord {
            review_id: Some(ctx.review.id),
            repository_id: ctx.repository.id,
            provider_id: provider.id,
            model: model.to_string(),
            status,
            prompt_tokens: usage.prompt_tokens as i64,
            completion_tokens: usage.completion_tokens as i64,
            total_tokens: usage.total_tokens as i64,
            duration_ms: duration_ms as i64,
            error_message,
        };
        if let Err(e) = self.store.log_usage(&record).await {
            warn!(review_id = ctx.review.id, error = %e, "failed to write usage log");
        }
    }

    /// Marks the review failed and settles the webhook event, best-effort.
    async fn fail_review(&self, review_id: i64, event_id: Option<i64>, message: &str) {
        if let Err(e) = self.store.mark_failed(review_id, message).await {
            warn!(review_id, error = %e, "failed to mark review as failed");
        }
        self.settle_event(event_id, EventStatus::Failed, Some(message))
            .await;
    }

    async fn settle_event(&self, event_id: Option<i64>, status: EventStatus, message: Option<&str>) {
        if let Some(event_id) = event_id {
            if let Err(e) = self
                .store
                .update_event_status(event_id, status, message)
                .await
            {
                warn!(event_id, error = %e, "failed to update webhook event status");
            }
        }
    }
}

/// Maps an LLM error onto the retry policy.
fn classify_llm_error(error: &LlmError, message: String) -> WorkerError {
    match error {
        LlmError::RateLimited { .. } | LlmError::RequestFailed(_) => {
            WorkerError::Transient(message)
        }
        LlmError::ApiError { code, .. } if *code >= 500 => WorkerError::Transient(message),
        _ => WorkerError::Permanent(message),
    }
}
