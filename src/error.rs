//! Cross-cutting error types for outbound integrations.
//!
//! Subsystem-local failures (queue, store, worker pool, config) define their
//! own error enums next to the code that produces them. The types here cover
//! the two remote surfaces the review pipeline talks to: LLM providers and
//! the source-control host.

use thiserror::Error;

/// Errors returned by LLM provider clients.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider configuration is missing an API key.
    #[error("Missing API key for provider '{0}'")]
    MissingApiKey(String),

    /// No constructor is registered for the requested provider type.
    #[error("Unknown provider type '{provider_type}' (registered: {registered})")]
    UnknownProviderType {
        provider_type: String,
        registered: String,
    },

    /// The HTTP request to the provider failed.
    #[error("LLM request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The provider response could not be decoded.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// The provider returned a rate limit response (HTTP 429).
    #[error("Rate limited by provider, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The provider returned a structured API error.
    #[error("LLM API error {code}: {message}")]
    ApiError { code: u16, message: String },

    /// The response contained no choices.
    #[error("LLM response contained no completion choices")]
    EmptyResponse,
}

/// Errors returned by source-control host clients.
#[derive(Debug, Error)]
pub enum ScmError {
    /// The HTTP request to the host failed.
    #[error("SCM request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The host returned a non-success status.
    #[error("SCM API error {status} on {operation}: {body}")]
    ApiError {
        status: u16,
        operation: String,
        body: String,
    },

    /// The merge request has no textual changes to review.
    #[error("Merge request !{change_iid} has an empty diff")]
    EmptyDiff { change_iid: i64 },
}
