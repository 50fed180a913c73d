//! Normalization of parsed review data into closed vocabularies.
//!
//! Model output is free-form: severities and categories arrive as arbitrary
//! synonyms, scores as floats or out-of-range values, file paths sometimes
//! missing. Everything downstream (statistics, storage, comment rendering)
//! works on the normalized form produced here, so normalization is total: any
//! input string maps to some enum variant.

use serde::{Deserialize, Serialize};

use super::{ParsedReview, ParsedSuggestion};

/// Sentinel file path for suggestions that name no file.
pub const UNKNOWN_FILE: &str = "unknown";

/// Placeholder summary when the model provided none.
pub const DEFAULT_SUMMARY: &str = "No summary provided";

/// Placeholder description when a suggestion carries none.
pub const DEFAULT_DESCRIPTION: &str = "No description provided";

/// Issue severity, in descending order of urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Maps an arbitrary model-supplied severity string onto a variant.
    ///
    /// Unrecognized input maps to `Medium` so the mapping is total.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "blocker" | "urgent" | "fatal" => Self::Critical,
            "high" | "major" | "important" | "error" => Self::High,
            "medium" | "moderate" | "warning" | "normal" => Self::Medium,
            "low" | "minor" | "trivial" | "info" | "suggestion" | "hint" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Issue category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    Style,
    Logic,
    Documentation,
    Other,
}

impl Category {
    /// Maps an arbitrary model-supplied category string onto a variant.
    ///
    /// Unrecognized input maps to `Other` so the mapping is total.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "security" | "sec" | "vulnerability" | "vuln" => Self::Security,
            "performance" | "perf" | "efficiency" | "optimization" => Self::Performance,
            "style" | "formatting" | "code style" | "lint" | "convention" => Self::Style,
            "logic" | "bug" | "error" | "correctness" | "behavior" => Self::Logic,
            "documentation" | "doc" | "docs" | "comment" | "comments" => Self::Documentation,
            _ => Self::Other,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Style => "style",
            Self::Logic => "logic",
            Self::Documentation => "documentation",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A review suggestion after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSuggestion {
    pub file_path: String,
    pub line_start: i32,
    pub line_end: i32,
    pub severity: Severity,
    pub category: Category,
    pub description: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

/// A complete review after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedReview {
    pub summary: String,
    /// Overall quality score, clamped to 0..=100.
    pub score: i32,
    pub suggestions: Vec<NormalizedSuggestion>,
    /// Whether the free-text fallback produced this review.
    pub fallback_used: bool,
}

/// Clamps a raw score into the 0..=100 range, truncating toward zero.
pub fn clamp_score(raw: f64) -> i32 {
    if raw.is_nan() {
        return 0;
    }
    (raw as i32).clamp(0, 100)
}

/// Converts a parsed review into its normalized form.
///
/// Applies score clamping, summary/description placeholders, the unknown-file
/// sentinel, line range repair, and severity/category vocabulary mapping.
pub fn normalize(parsed: ParsedReview) -> NormalizedReview {
    let summary = if parsed.summary.trim().is_empty() {
        DEFAULT_SUMMARY.to_string()
    } else {
        parsed.summary.trim().to_string()
    };

    let suggestions = parsed
        .suggestions
        .into_iter()
        .map(normalize_suggestion)
        .collect();

    NormalizedReview {
        summary,
        score: clamp_score(parsed.score),
        suggestions,
        fallback_used: parsed.fallback_used,
    }
}

fn normalize_suggestion(raw: ParsedSuggestion) -> NormalizedSuggestion {
    let file_path = if raw.file_path.trim().is_empty() {
        UNKNOWN_FILE.to_string()
    } else {
        raw.file_path.trim().to_string()
    };

    let description = if raw.description.trim().is_empty() {
        DEFAULT_DESCRIPTION.to_string()
    } else {
        raw.description.trim().to_string()
    };

    let line_start = raw.line_start.max(0);
    let line_end = raw.line_end.max(line_start);

    NormalizedSuggestion {
        file_path,
        line_start,
        line_end,
        severity: Severity::normalize(&raw.severity),
        category: Category::normalize(&raw.category),
        description,
        suggestion: raw.suggestion.trim().to_string(),
        code_snippet: raw.code_snippet.filter(|s| !s.trim().is_empty()),
    }
}
