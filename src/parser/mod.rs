//! LLM response parsing and normalization.
//!
//! Turns raw model output into a [`NormalizedReview`] in two stages:
//!
//! 1. Parse: JSON extraction with a multi-strategy cascade ([`extract`]) and
//!    tolerant field mapping ([`fields`]), falling back to free-text
//!    heuristics ([`text`]) when no JSON is found.
//! 2. Normalize ([`normalize`]): closed severity/category vocabularies,
//!    score clamping, sentinel values.
//!
//! Parsing fails only on empty input. Any non-empty model output produces a
//! review, possibly a degraded one.

mod extract;
mod fields;
pub mod normalize;
mod text;

pub use extract::extract_json;
pub use normalize::{
    normalize, Category, NormalizedReview, NormalizedSuggestion, Severity, DEFAULT_SUMMARY,
    UNKNOWN_FILE,
};

use thiserror::Error;

/// Errors from review parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The model returned no usable text at all.
    #[error("LLM response is empty")]
    EmptyResponse,
}

/// A review as parsed from model output, before normalization.
#[derive(Debug, Clone)]
pub struct ParsedReview {
    pub summary: String,
    pub score: f64,
    pub suggestions: Vec<ParsedSuggestion>,
    /// True when the free-text fallback produced this review.
    pub fallback_used: bool,
}

/// A suggestion as parsed from model output, before normalization.
#[derive(Debug, Clone)]
pub struct ParsedSuggestion {
    pub file_path: String,
    pub line_start: i32,
    pub line_end: i32,
    pub severity: String,
    pub category: String,
    pub description: String,
    pub suggestion: String,
    pub code_snippet: Option<String>,
}

/// Parses raw model output into a review.
///
/// Tries JSON extraction first; if no strategy yields a JSON object, falls
/// back to free-text heuristics.
///
/// # Errors
///
/// Returns `ParseError::EmptyResponse` if the input is empty or whitespace.
pub fn parse_review(raw: &str) -> Result<ParsedReview, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    match extract::extract_json(raw) {
        Some(value) => Ok(fields::map_review(&value)),
        None => Ok(text::parse_text(raw)),
    }
}

/// Parses and normalizes in one step.
///
/// # Errors
///
/// Returns `ParseError::EmptyResponse` for empty input.
pub fn parse_and_normalize(raw: &str) -> Result<NormalizedReview, ParseError> {
    parse_review(raw).map(normalize::normalize)
}
