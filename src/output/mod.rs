//! Versioned review document rendering and statistics.
//!
//! The worker persists a self-describing JSON document alongside the raw
//! model output. Consumers (dashboards, exports) read the document without
//! touching the relational rows, so its shape is versioned via
//! `schema_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{NormalizedReview, NormalizedSuggestion, Severity, UNKNOWN_FILE};

/// Current review document schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Number of files reported in the per-file issue ranking.
const TOP_FILES_LIMIT: usize = 5;

/// Maps a clamped score to a coarse quality label.
pub fn quality_level(score: i32) -> &'static str {
    match score {
        s if s >= 90 => "excellent",
        s if s >= 75 => "good",
        s if s >= 60 => "acceptable",
        s if s >= 40 => "poor",
        _ => "critical",
    }
}

/// Identifies the review target inside the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputContext {
    pub repository: String,
    pub change_iid: i64,
    pub change_title: String,
    pub provider: String,
    pub model: String,
}

/// Generation metadata carried alongside the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMetadata {
    /// Where the prompt came from: "repository", "project", or "default".
    pub prompt_source: String,
    /// True when free-text fallback parsing produced the result.
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    pub duration_ms: u64,
}

/// Issue counts by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Issue counts by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub security: usize,
    pub performance: usize,
    pub style: usize,
    pub logic: usize,
    pub documentation: usize,
    pub other: usize,
}

/// Per-file issue count for the top-files ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssueCount {
    pub file_path: String,
    pub issue_count: usize,
}

/// Aggregate statistics over a review's suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStatistics {
    pub total_issues: usize,
    pub by_severity: SeverityBreakdown,
    pub by_category: CategoryBreakdown,
    /// Distinct files with at least one issue, excluding the unknown sentinel.
    pub files_affected: usize,
    /// Up to five files ranked by issue count, first-seen order on ties.
    pub top_files: Vec<FileIssueCount>,
}

/// Computes statistics over normalized suggestions.
///
/// Pure and deterministic; the unknown-file sentinel is excluded from file
/// aggregation but still counted in totals and breakdowns.
pub fn compute_statistics(suggestions: &[NormalizedSuggestion]) -> ReviewStatistics {
    let mut stats = ReviewStatistics {
        total_issues: suggestions.len(),
        ..Default::default()
    };

    // First-seen order so ranking ties are stable.
    let mut file_counts: Vec<(String, usize)> = Vec::new();

    for s in suggestions {
        match s.severity {
            Severity::Critical => stats.by_severity.critical += 1,
            Severity::High => stats.by_severity.high += 1,
            Severity::Medium => stats.by_severity.medium += 1,
            Severity::Low => stats.by_severity.low += 1,
        }

        match s.category {
            crate::parser::Category::Security => stats.by_category.security += 1,
            crate::parser::Category::Performance => stats.by_category.performance += 1,
            crate::parser::Category::Style => stats.by_category.style += 1,
            crate::parser::Category::Logic => stats.by_category.logic += 1,
            crate::parser::Category::Documentation => stats.by_category.documentation += 1,
            crate::parser::Category::Other => stats.by_category.other += 1,
        }

        if s.file_path != UNKNOWN_FILE {
            match file_counts.iter_mut().find(|(path, _)| *path == s.file_path) {
                Some((_, count)) => *count += 1,
                None => file_counts.push((s.file_path.clone(), 1)),
            }
        }
    }

    stats.files_affected = file_counts.len();

    // Stable sort keeps first-seen order for equal counts.
    file_counts.sort_by(|a, b| b.1.cmp(&a.1));
    stats.top_files = file_counts
        .into_iter()
        .take(TOP_FILES_LIMIT)
        .map(|(file_path, issue_count)| FileIssueCount {
            file_path,
            issue_count,
        })
        .collect();

    stats
}

/// A suggestion with its 1-based position in the review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSuggestion {
    pub index: usize,
    #[serde(flatten)]
    pub suggestion: NormalizedSuggestion,
}

/// The review result section of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResult {
    pub summary: String,
    pub score: i32,
    pub quality_level: String,
    pub suggestions: Vec<OutputSuggestion>,
}

/// The complete versioned review document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDocument {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub context: OutputContext,
    pub result: OutputResult,
    pub statistics: ReviewStatistics,
    pub metadata: OutputMetadata,
}

impl ReviewDocument {
    /// Assembles a document from a normalized review.
    pub fn build(
        review: &NormalizedReview,
        context: OutputContext,
        metadata: OutputMetadata,
    ) -> Self {
        let suggestions = review
            .suggestions
            .iter()
            .enumerate()
            .map(|(i, s)| OutputSuggestion {
                index: i + 1,
                suggestion: s.clone(),
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            context,
            result: OutputResult {
                summary: review.summary.clone(),
                score: review.score,
                quality_level: quality_level(review.score).to_string(),
                suggestions,
            },
            statistics: compute_statistics(&review.suggestions),
            metadata,
        }
    }

    /// Renders the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
