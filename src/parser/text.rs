//! Free-text fallback parsing.
//!
//! When no JSON object can be extracted from model output, the review is
//! reconstructed heuristically: a summary line or leading paragraph, a score
//! from explicit patterns or keyword tone, and suggestions from list items.
//! The result is always usable, if coarse.

use regex::Regex;

use super::{ParsedReview, ParsedSuggestion};

/// Upper bound on suggestions harvested from list items.
const MAX_TEXT_SUGGESTIONS: usize = 20;

/// Maximum length of a summary taken from a leading paragraph.
const MAX_SUMMARY_LEN: usize = 500;

/// Builds a review from plain prose.
///
/// Deterministic for a given input; marks the result as fallback-derived.
pub fn parse_text(raw: &str) -> ParsedReview {
    ParsedReview {
        summary: extract_summary(raw),
        score: extract_score(raw),
        suggestions: extract_suggestions(raw),
        fallback_used: true,
    }
}

/// Pulls a summary from a labeled line or the first paragraph.
fn extract_summary(raw: &str) -> String {
    for line in raw.lines() {
        let lower = line.trim().to_lowercase();
        for label in ["summary:", "overall:", "overall assessment:"] {
            if lower.starts_with(label) {
                let rest = line.trim()[label.len()..].trim();
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
    }

    // First non-empty paragraph, bounded.
    let paragraph = raw
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("");

    let mut summary: String = paragraph.chars().take(MAX_SUMMARY_LEN).collect();
    if paragraph.chars().count() > MAX_SUMMARY_LEN {
        summary.push_str("...");
    }
    summary
}

/// Extracts a score from explicit patterns, else estimates from tone.
fn extract_score(raw: &str) -> f64 {
    let patterns = [
        r"(?i)score[:\s]+(\d{1,3})",
        r"(?i)rating[:\s]+(\d{1,3})",
        r"\b(\d{1,3})\s*/\s*100\b",
    ];

    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(cap) = re.captures(raw) {
                if let Some(m) = cap.get(1) {
                    if let Ok(score) = m.as_str().parse::<f64>() {
                        return score;
                    }
                }
            }
        }
    }

    // No explicit score; estimate from keyword tone.
    let lower = raw.to_lowercase();
    if lower.contains("excellent") || lower.contains("perfect") {
        90.0
    } else if lower.contains("good") || lower.contains("well-written") {
        75.0
    } else if lower.contains("issue") || lower.contains("problem") || lower.contains("bug") {
        60.0
    } else {
        70.0
    }
}

/// Harvests suggestions from bulleted or numbered list items.
fn extract_suggestions(raw: &str) -> Vec<ParsedSuggestion> {
    let mut suggestions = Vec::new();

    for line in raw.lines() {
        if suggestions.len() >= MAX_TEXT_SUGGESTIONS {
            break;
        }

        let Some(item) = list_item_text(line) else {
            continue;
        };
        if item.is_empty() {
            continue;
        }

        suggestions.push(ParsedSuggestion {
            file_path: spot_file_path(item).unwrap_or_default(),
            line_start: spot_line_number(item).unwrap_or(0),
            line_end: spot_line_number(item).unwrap_or(0),
            severity: spot_keyword(
                item,
                &["critical", "blocker", "major", "high", "minor", "low"],
            )
            .unwrap_or_default(),
            category: spot_keyword(
                item,
                &[
                    "security",
                    "performance",
                    "style",
                    "documentation",
                    "logic",
                    "bug",
                ],
            )
            .unwrap_or_default(),
            description: item.to_string(),
            suggestion: String::new(),
            code_snippet: None,
        });
    }

    suggestions
}

/// Strips a bullet or numbered-list prefix, returning the item body.
fn list_item_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();

    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = trimmed.strip_prefix(bullet) {
            return Some(rest.trim());
        }
    }

    // Numbered items: "1. text" or "12) text"
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 3 {
        let rest = &trimmed[digits..];
        if let Some(body) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(body.trim());
        }
    }

    None
}

/// Finds a path-like token with a file extension.
fn spot_file_path(item: &str) -> Option<String> {
    let re = Regex::new(r"\b([\w./-]+\.[A-Za-z]{1,10})\b").ok()?;
    re.captures(item)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Finds an explicit "line N" reference.
fn spot_line_number(item: &str) -> Option<i32> {
    let re = Regex::new(r"(?i)line\s+(\d+)").ok()?;
    re.captures(item)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Returns the first keyword found in the item, lowercased.
fn spot_keyword(item: &str, keywords: &[&str]) -> Option<String> {
    let lower = item.to_lowercase();
    keywords
        .iter()
        .find(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_labeled_line() {
        let raw = "Some preamble.\nSummary: The change is solid.\nMore text.";
        assert_eq!(extract_summary(raw), "The change is solid.");
    }

    #[test]
    fn test_summary_from_first_paragraph() {
        let raw = "This change refactors the parser.\n\nDetails follow.";
        assert_eq!(extract_summary(raw), "This change refactors the parser.");
    }

    #[test]
    fn test_summary_truncated() {
        let raw = "x".repeat(600);
        let summary = extract_summary(&raw);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), MAX_SUMMARY_LEN + 3);
    }

    #[test]
    fn test_score_explicit_patterns() {
        assert_eq!(extract_score("Score: 85"), 85.0);
        assert_eq!(extract_score("rating: 42 overall"), 42.0);
        assert_eq!(extract_score("I'd give this 67/100."), 67.0);
    }

    #[test]
    fn test_score_keyword_estimates() {
        assert_eq!(extract_score("Excellent work throughout."), 90.0);
        assert_eq!(extract_score("Good structure, readable."), 75.0);
        assert_eq!(extract_score("There is a problem with locking."), 60.0);
        assert_eq!(extract_score("Nothing remarkable."), 70.0);
    }

    #[test]
    fn test_suggestions_from_bullets() {
        let raw = "Issues:\n- Unclear naming in src/worker.rs at line 42, minor style nit\n* Potential security hole in auth.rs";
        let suggestions = extract_suggestions(raw);

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].file_path, "src/worker.rs");
        assert_eq!(suggestions[0].line_start, 42);
        assert_eq!(suggestions[0].severity, "minor");
        assert_eq!(suggestions[0].category, "style");
        assert_eq!(suggestions[1].category, "security");
    }

    #[test]
    fn test_suggestions_from_numbered_items() {
        let raw = "1. Fix the bug in parse.rs\n2) Add documentation";
        let suggestions = extract_suggestions(raw);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].category, "bug");
        assert_eq!(suggestions[1].category, "documentation");
    }

    #[test]
    fn test_suggestion_cap() {
        let raw: String = (0..30).map(|i| format!("- item {}\n", i)).collect();
        assert_eq!(extract_suggestions(&raw).len(), MAX_TEXT_SUGGESTIONS);
    }

    #[test]
    fn test_parse_text_deterministic() {
        let raw = "Summary: fine\nScore: 80\n- fix naming in a.rs";
        let first = parse_text(raw);
        let second = parse_text(raw);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.score, second.score);
        assert_eq!(first.suggestions.len(), second.suggestions.len());
        assert!(first.fallback_used);
    }
}
