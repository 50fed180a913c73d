//! Tolerant field mapping from extracted JSON to the parsed review shape.
//!
//! Providers disagree on field names (`file` vs `file_path`, `message` vs
//! `description`, `line` vs `line_start`) and on value types (scores and line
//! numbers arrive as numbers or numeric strings). Mapping reads the canonical
//! name first and falls back to the alias, coercing scalars as needed.

use serde_json::Value;

use super::{ParsedReview, ParsedSuggestion};

/// Maps an extracted JSON object onto the parsed review shape.
///
/// Missing fields take zero-value defaults; malformed suggestion entries are
/// skipped rather than failing the whole review.
pub fn map_review(value: &Value) -> ParsedReview {
    let summary = str_field(value, &["summary"]).unwrap_or_default();
    let score = num_field(value, &["score"]).unwrap_or(0.0);

    let suggestions = value
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(map_suggestion).collect())
        .unwrap_or_default();

    ParsedReview {
        summary,
        score,
        suggestions,
        fallback_used: false,
    }
}

fn map_suggestion(entry: &Value) -> Option<ParsedSuggestion> {
    if !entry.is_object() {
        return None;
    }

    let line_start = int_field(entry, &["line_start", "line"]).unwrap_or(0);
    let line_end = int_field(entry, &["line_end"]).unwrap_or(line_start);

    Some(ParsedSuggestion {
        file_path: str_field(entry, &["file_path", "file"]).unwrap_or_default(),
        line_start,
        line_end,
        severity: str_field(entry, &["severity"]).unwrap_or_default(),
        category: str_field(entry, &["category"]).unwrap_or_default(),
        description: str_field(entry, &["description", "message"]).unwrap_or_default(),
        suggestion: str_field(entry, &["suggestion"]).unwrap_or_default(),
        code_snippet: str_field(entry, &["code_snippet"]).filter(|s| !s.is_empty()),
    })
}

/// Reads the first present string field from a list of candidate names.
fn str_field(value: &Value, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(s) = value.get(*name).and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    None
}

/// Reads the first present numeric field, coercing numeric strings.
fn num_field(value: &Value, names: &[&str]) -> Option<f64> {
    for name in names {
        match value.get(*name) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.trim().parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

fn int_field(value: &Value, names: &[&str]) -> Option<i32> {
    num_field(value, names).map(|n| n as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_canonical_fields() {
        let value = json!({
            "summary": "Clean change",
            "score": 88,
            "suggestions": [{
                "file_path": "src/db.rs",
                "line_start": 10,
                "line_end": 14,
                "severity": "high",
                "category": "logic",
                "description": "off-by-one",
                "suggestion": "use <=",
                "code_snippet": "for i in 0..n"
            }]
        });

        let parsed = map_review(&value);
        assert_eq!(parsed.summary, "Clean change");
        assert!((parsed.score - 88.0).abs() < f64::EPSILON);
        assert!(!parsed.fallback_used);

        let s = &parsed.suggestions[0];
        assert_eq!(s.file_path, "src/db.rs");
        assert_eq!(s.line_start, 10);
        assert_eq!(s.line_end, 14);
        assert_eq!(s.code_snippet.as_deref(), Some("for i in 0..n"));
    }

    #[test]
    fn test_map_alias_fields() {
        let value = json!({
            "summary": "ok",
            "score": 70,
            "suggestions": [{
                "file": "lib.rs",
                "line": 5,
                "message": "unclear naming"
            }]
        });

        let parsed = map_review(&value);
        let s = &parsed.suggestions[0];
        assert_eq!(s.file_path, "lib.rs");
        assert_eq!(s.line_start, 5);
        // line_end falls back to line_start when absent
        assert_eq!(s.line_end, 5);
        assert_eq!(s.description, "unclear naming");
    }

    #[test]
    fn test_canonical_name_wins_over_alias() {
        let value = json!({
            "suggestions": [{
                "file_path": "canonical.rs",
                "file": "alias.rs",
                "description": "canonical text",
                "message": "alias text"
            }]
        });

        let parsed = map_review(&value);
        let s = &parsed.suggestions[0];
        assert_eq!(s.file_path, "canonical.rs");
        assert_eq!(s.description, "canonical text");
    }

    #[test]
    fn test_score_as_string() {
        let value = json!({"summary": "x", "score": "85.5"});
        let parsed = map_review(&value);
        assert!((parsed.score - 85.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_as_float() {
        let value = json!({"summary": "x", "score": 72.4});
        let parsed = map_review(&value);
        assert!((parsed.score - 72.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_malformed_suggestion_entries_skipped() {
        let value = json!({
            "summary": "x",
            "score": 50,
            "suggestions": ["not an object", 42, {"file": "kept.rs"}]
        });

        let parsed = map_review(&value);
        assert_eq!(parsed.suggestions.len(), 1);
        assert_eq!(parsed.suggestions[0].file_path, "kept.rs");
    }

    #[test]
    fn test_missing_fields_default() {
        let value = json!({});
        let parsed = map_review(&value);
        assert_eq!(parsed.summary, "");
        assert_eq!(parsed.score, 0.0);
        assert!(parsed.suggestions.is_empty());
    }
}
