//! Webhook ingestion: classify, authenticate, persist, enqueue.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::{JobDispatcher, QueueError, ReviewJob};
use crate::store::{ReviewStore, StoreError};

use super::validator::{classify_payload, verify_token, Classification};

/// Errors the webhook endpoint maps to a 500 response.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The review row exists but its job could not be enqueued.
    #[error("failed to enqueue job for review {review_id}: {source}")]
    Dispatch {
        review_id: i64,
        #[source]
        source: QueueError,
    },
}

/// What happened to one webhook delivery.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Delivery was understood but produced no work.
    Ignored { reason: String },
    /// Delivery was rejected; maps to a 4xx response.
    Rejected(RejectReason),
    /// A review row exists for the change. `job_id` is set only when a new
    /// job was enqueued; redeliveries refresh the row without one.
    Accepted {
        review_id: i64,
        job_id: Option<Uuid>,
    },
}

#[derive(Debug)]
pub enum RejectReason {
    /// Body was not a parseable merge request event.
    Malformed(String),
    /// Token did not match the repository secret.
    InvalidToken,
}

/// Turns raw webhook deliveries into review rows and queue jobs.
pub struct WebhookIngestor {
    store: Arc<dyn ReviewStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    max_attempts: u32,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            max_attempts,
        }
    }

    /// Processes one delivery end to end.
    ///
    /// The sequence is: classify the body, find the repository, verify the
    /// token, dedupe the delivery, upsert the review row, and enqueue a job.
    /// A redelivered event (same commit) refreshes the row's descriptive
    /// fields but never enqueues a second job. A new commit on a change whose
    /// review already finished reopens it and enqueues; a review still
    /// pending or processing keeps its existing job.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on storage failures, or when the review row
    /// was written but the job could not reach the queue. In the latter case
    /// the review is marked failed first so it does not linger as pending.
    pub async fn ingest(
        &self,
        token: Option<&str>,
        body: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let event = match classify_payload(body) {
            Classification::Malformed(message) => {
                warn!(error = %message, "rejecting malformed webhook payload");
                return Ok(IngestOutcome::Rejected(RejectReason::Malformed(message)));
            }
            Classification::NotMergeRequest(kind) => {
                debug!(object_kind = %kind, "ignoring non merge request event");
                return Ok(IngestOutcome::Ignored {
                    reason: format!("unsupported event kind: {kind}"),
                });
            }
            Classification::MergeRequest(event) => event,
        };

        if !event.should_trigger_review() {
            let attrs = &event.object_attributes;
            debug!(
                action = %attrs.action,
                state = %attrs.state,
                "ignoring non-reviewable merge request event"
            );
            return Ok(IngestOutcome::Ignored {
                reason: format!(
                    "action {} on {} merge request is not reviewable",
                    attrs.action, attrs.state
                ),
            });
        }

        let change = event.to_change_descriptor();

        let Some(repository) = self
            .store
            .find_repository(change.project_external_id)
            .await?
        else {
            debug!(
                project_id = change.project_external_id,
                "no configured repository for project"
            );
            return Ok(IngestOutcome::Ignored {
                reason: format!(
                    "project {} is not configured for review",
                    change.project_external_id
                ),
            });
        };

        if !verify_token(token, repository.webhook_secret.as_deref()) {
            warn!(
                repository_id = repository.id,
                "webhook token mismatch, rejecting delivery"
            );
            return Ok(IngestOutcome::Rejected(RejectReason::InvalidToken));
        }

        if repository.llm_provider_id.is_none() {
            warn!(
                repository_id = repository.id,
                "repository has no LLM provider configured"
            );
            return Ok(IngestOutcome::Ignored {
                reason: format!("repository {} has no LLM provider", repository.id),
            });
        }

        let payload: serde_json::Value =
            serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
        let event_id = self
            .store
            .record_webhook_event(repository.id, &change, &payload)
            .await?;

        let outcome = self
            .store
            .upsert_review(
                repository.id,
                repository.llm_provider_id,
                &change,
                event_id,
            )
            .await?;
        let review_id = outcome.review.id;

        if event_id.is_none() {
            // Same commit delivered twice; the row was refreshed above but
            // any queued or finished work stands.
            info!(review_id, commit_sha = %change.last_commit_sha, "duplicate webhook delivery");
            return Ok(IngestOutcome::Accepted {
                review_id,
                job_id: None,
            });
        }

        if !outcome.created {
            // A new commit on an already-reviewed change reopens the review;
            // a pending or processing one keeps its queued job.
            let reopened = self.store.reopen_for_new_commit(review_id).await?;
            if !reopened {
                info!(
                    review_id,
                    change_iid = change.change_iid,
                    "review already in flight, not re-enqueueing"
                );
                return Ok(IngestOutcome::Accepted {
                    review_id,
                    job_id: None,
                });
            }
            info!(
                review_id,
                commit_sha = %change.last_commit_sha,
                "reopened finished review for new commit"
            );
        }

        let job = ReviewJob::new(review_id).with_max_attempts(self.max_attempts);
        let job_id = job.id;
        match self.dispatcher.dispatch(job).await {
            Ok(_) => {
                info!(
                    review_id,
                    job_id = %job_id,
                    repository_id = repository.id,
                    change_iid = change.change_iid,
                    "review enqueued"
                );
                Ok(IngestOutcome::Accepted {
                    review_id,
                    job_id: Some(job_id),
                })
            }
            Err(e) => {
                // The row would otherwise sit pending forever with no job
                // behind it.
                if let Err(mark_err) = self
                    .store
                    .mark_failed(review_id, &format!("failed to enqueue review job: {e}"))
                    .await
                {
                    warn!(review_id, error = %mark_err, "failed to mark orphaned review as failed");
                }
                Err(IngestError::Dispatch {
                    review_id,
                    source: e,
                })
            }
        }
    }
}
