//! Persistent domain rows and status vocabularies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::parser::{Category, NormalizedSuggestion, Severity};

/// Lifecycle of a review row.
///
/// `Completed` and `Failed` are terminal; nothing moves a review out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored status string. Unknown values read as `Pending`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a recorded webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Ignored,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome label for an LLM usage log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Failed,
    Timeout,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// A repository registered for review.
///
/// Platform credentials are flattened onto the row; the service reviews one
/// SCM host per repository entry.
#[derive(Debug, Clone, FromRow)]
pub struct Repository {
    pub id: i64,
    /// Project id on the SCM host (GitLab project id).
    pub external_id: i64,
    pub name: String,
    pub platform_base_url: String,
    pub access_token: String,
    pub webhook_secret: Option<String>,
    pub llm_provider_id: Option<i64>,
    /// Repository-level prompt override.
    pub review_prompt: Option<String>,
    /// Logical project grouping for project-level prompt lookup.
    pub project_id: Option<i64>,
    pub is_active: bool,
}

/// An LLM provider configuration as stored.
///
/// The API key is handed out already usable; credential encryption is a
/// storage concern outside this service.
#[derive(Debug, Clone, FromRow)]
pub struct LlmProviderConfig {
    pub id: i64,
    pub name: String,
    pub provider_type: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// A review row, one per (repository, change) pair.
#[derive(Debug, Clone, FromRow)]
pub struct Review {
    pub id: i64,
    pub repository_id: i64,
    pub change_iid: i64,
    pub title: String,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub web_url: String,
    pub commit_sha: String,
    pub status: String,
    pub score: Option<i32>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    /// Raw model output text, kept for debugging.
    pub raw_response: Option<String>,
    /// Rendered versioned review document.
    pub result_json: Option<String>,
    pub comment_posted: bool,
    pub webhook_event_id: Option<i64>,
    pub llm_provider_id: Option<i64>,
    /// Aggregate counters, written with `save_completed`. Severity buckets
    /// plus the security/performance categories; everything else rolls up
    /// into the quality counter.
    pub issues_found: i32,
    pub critical_issues_count: i32,
    pub high_issues_count: i32,
    pub medium_issues_count: i32,
    pub low_issues_count: i32,
    pub security_issues_count: i32,
    pub performance_issues_count: i32,
    pub quality_issues_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Review {
    /// The row status as an enum.
    pub fn current_status(&self) -> ReviewStatus {
        ReviewStatus::parse(&self.status)
    }
}

/// A stored suggestion row.
#[derive(Debug, Clone, FromRow)]
pub struct SuggestionRecord {
    pub id: i64,
    pub review_id: i64,
    pub file_path: String,
    pub line_start: i32,
    pub line_end: i32,
    pub severity: String,
    pub category: String,
    pub description: String,
    pub suggestion: String,
    pub code_snippet: Option<String>,
}

impl SuggestionRecord {
    /// Rebuilds the normalized form, e.g. to re-render a comment on retry.
    pub fn to_normalized(&self) -> NormalizedSuggestion {
        NormalizedSuggestion {
            file_path: self.file_path.clone(),
            line_start: self.line_start,
            line_end: self.line_end,
            severity: Severity::normalize(&self.severity),
            category: Category::normalize(&self.category),
            description: self.description.clone(),
            suggestion: self.suggestion.clone(),
            code_snippet: self.code_snippet.clone(),
        }
    }
}

/// Input for the LLM usage log.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub review_id: Option<i64>,
    pub repository_id: i64,
    pub provider_id: i64,
    pub model: String,
    pub status: UsageStatus,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// Result of the idempotent review upsert.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub review: Review,
    /// True when the row was inserted rather than refreshed.
    pub created: bool,
}

/// Everything the worker needs to process one review.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub review: Review,
    pub repository: Repository,
    pub provider: Option<LlmProviderConfig>,
    /// Project-level prompt override, if any.
    pub project_prompt: Option<String>,
}
