//! Persistence layer: PostgreSQL-backed job store.
//!
//! [`ReviewStore`] is the seam the ingestion path and the worker talk to;
//! [`Database`] is its PostgreSQL implementation. Integration tests supply an
//! in-memory implementation instead.

pub mod database;
pub mod models;
pub mod schema;

pub use database::Database;
pub use models::{
    EventStatus, LlmProviderConfig, Repository, Review, ReviewContext, ReviewStatus,
    SuggestionRecord, UpsertOutcome, UsageRecord, UsageStatus,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::parser::NormalizedReview;
use crate::webhook::ChangeDescriptor;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// A query failed.
    #[error("Database query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// An entity referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

/// Storage operations used by ingestion and the review worker.
///
/// Implementations must keep two invariants:
///
/// - `upsert_review` never moves an existing row's status; it only refreshes
///   descriptive fields.
/// - `save_completed` replaces the review's suggestions atomically with the
///   status update, so a re-run can never leave duplicates behind.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Looks up an active repository by its SCM-host project id.
    async fn find_repository(&self, external_id: i64) -> Result<Option<Repository>, StoreError>;

    /// Records a webhook delivery, deduplicated by (repository, commit sha).
    ///
    /// Returns `None` when this delivery was already seen.
    async fn record_webhook_event(
        &self,
        repository_id: i64,
        change: &ChangeDescriptor,
        payload: &serde_json::Value,
    ) -> Result<Option<i64>, StoreError>;

    /// Creates or refreshes the review row for a change.
    async fn upsert_review(
        &self,
        repository_id: i64,
        provider_id: Option<i64>,
        change: &ChangeDescriptor,
        webhook_event_id: Option<i64>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Loads the review plus its repository, provider, and project prompt.
    async fn load_context(&self, review_id: i64) -> Result<ReviewContext, StoreError>;

    /// Loads the stored suggestions for a review.
    async fn load_suggestions(&self, review_id: i64) -> Result<Vec<SuggestionRecord>, StoreError>;

    /// Moves a non-completed review to processing. Failed reviews may move
    /// back here when the queue redelivers their job.
    async fn mark_processing(&self, review_id: i64) -> Result<(), StoreError>;

    /// Moves a review to failed with an error message.
    async fn mark_failed(&self, review_id: i64, message: &str) -> Result<(), StoreError>;

    /// Moves a finished review back to pending so a new commit on the same
    /// change gets a fresh review.
    ///
    /// Returns `false` when the review is still pending or processing; its
    /// queued job must not be duplicated.
    async fn reopen_for_new_commit(&self, review_id: i64) -> Result<bool, StoreError>;

    /// Persists a completed review and its suggestions in one transaction.
    async fn save_completed(
        &self,
        review_id: i64,
        review: &NormalizedReview,
        raw_response: &str,
        result_json: &str,
    ) -> Result<(), StoreError>;

    /// Records that the review comment reached the SCM host.
    async fn set_comment_posted(&self, review_id: i64) -> Result<(), StoreError>;

    /// Updates a webhook event's status. Callers treat failures as best-effort.
    async fn update_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Appends an LLM usage log entry. Callers treat failures as best-effort.
    async fn log_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;
}
