//! JSON extraction from raw model output.
//!
//! Models rarely return bare JSON: the payload is usually wrapped in code
//! fences, surrounded by prose, or preceded by reasoning text. Extraction
//! tries a sequence of strategies, from most to least precise:
//!
//! 1. ```json fenced blocks
//! 2. Any fenced block
//! 3. Brace matching from the first `{`
//! 4. Scan for any balanced `{...}` span
//!
//! Every strategy accepts only objects that carry at least one review-level
//! key. Models sometimes echo unrelated JSON (a config snippet, a tool call)
//! alongside their prose; without the shape check that JSON would win over
//! the free-text fallback and produce an empty review. The first strategy
//! that yields a review-shaped object wins.

use regex::Regex;
use serde_json::Value;

/// Attempts to extract a review-shaped JSON object from raw model output.
///
/// Returns `None` if no strategy yields a review-shaped object, signalling
/// the caller to fall back to free-text parsing.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Strategy 1: ```json fenced block
    if let Ok(re) = Regex::new(r"(?s)```json\s*(.*?)\s*```") {
        for cap in re.captures_iter(trimmed) {
            if let Some(matched) = cap.get(1) {
                if let Some(value) = parse_review_object(matched.as_str()) {
                    return Some(value);
                }
            }
        }
    }

    // Strategy 2: any fenced block
    if let Ok(re) = Regex::new(r"(?s)```(?:\w+)?\s*(.*?)\s*```") {
        for cap in re.captures_iter(trimmed) {
            if let Some(matched) = cap.get(1) {
                let candidate = matched.as_str().trim();
                if candidate.starts_with('{') {
                    if let Some(value) = parse_review_object(candidate) {
                        return Some(value);
                    }
                }
            }
        }
    }

    // Strategy 3: brace matching from the first opening brace
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = find_matching_brace(trimmed, start) {
            if let Some(value) = parse_review_object(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }

    // Strategy 4: any balanced span that parses as a review object. Covers
    // output where an early brace belongs to prose or a broken object.
    let mut best: Option<(usize, Value)> = None;
    for (idx, ch) in trimmed.char_indices() {
        if ch != '{' {
            continue;
        }
        if let Some(end) = find_matching_brace(trimmed, idx) {
            let span = &trimmed[idx..=end];
            if let Some(value) = parse_review_object(span) {
                let len = span.len();
                if best.as_ref().map_or(true, |(best_len, _)| len > *best_len) {
                    best = Some((len, value));
                }
            }
        }
    }

    best.map(|(_, value)| value)
}

/// Parses a candidate string, accepting only review-shaped JSON objects.
fn parse_review_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value) if value.is_object() && looks_review_shaped(&value) => Some(value),
        _ => None,
    }
}

/// Whether a parsed object carries at least one review-level key.
fn looks_review_shaped(value: &Value) -> bool {
    value.get("summary").is_some()
        || value.get("score").is_some()
        || value.get("suggestions").is_some()
}

/// Finds the index of the brace matching the one at `start`.
///
/// Tracks string literals and escape sequences so braces inside JSON strings
/// do not affect nesting depth. Returns `None` if the braces never balance.
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &byte) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }

        match byte {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_json_fence() {
        let raw = "Here is my review:\n```json\n{\"summary\": \"ok\", \"score\": 80}\n```\nDone.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["summary"], "ok");
        assert_eq!(value["score"], 80);
    }

    #[test]
    fn test_extract_from_generic_fence() {
        let raw = "```\n{\"score\": 75, \"suggestions\": []}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["score"], 75);
    }

    #[test]
    fn test_extract_bare_object() {
        let raw = "{\"summary\": \"fine\", \"score\": 90, \"suggestions\": []}";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["summary"], "fine");
    }

    #[test]
    fn test_extract_object_with_surrounding_prose() {
        let raw = "The code looks good overall. {\"summary\": \"good\", \"score\": 85} Hope that helps!";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["score"], 85);
    }

    #[test]
    fn test_extract_skips_broken_leading_object() {
        // The first brace opens an unterminated object; a valid review object
        // appears later in the output.
        let raw = "partial { not json\nbut here: {\"summary\": \"later\", \"score\": 60, \"suggestions\": []}";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["summary"], "later");
    }

    #[test]
    fn test_extract_handles_braces_in_strings() {
        let raw = r#"{"summary": "watch out for } in strings", "score": 70}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["summary"], "watch out for } in strings");
    }

    #[test]
    fn test_extract_skips_unrelated_embedded_json() {
        // A fenced config snippet is valid JSON but not a review; it must
        // not shadow the free-text fallback.
        let raw = "Here are the settings I used:\n\
            ```json\n{\"temperature\": 0.2, \"max_tokens\": 800}\n```\n\
            score: 85\n- tighten error handling in src/lib.rs";
        assert!(extract_json(raw).is_none());
    }

    #[test]
    fn test_extract_prefers_review_object_over_other_json() {
        let raw = r#"{"temperature": 0.2} then {"summary": "solid", "score": 88, "suggestions": []}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["summary"], "solid");
    }

    #[test]
    fn test_extract_none_for_plain_text() {
        assert!(extract_json("The code is fine, no issues found.").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn test_extract_none_for_json_array() {
        // Top-level arrays are not review objects.
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_find_matching_brace_nested() {
        let text = r#"{"a": {"b": 1}, "c": 2}"#;
        assert_eq!(find_matching_brace(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn test_find_matching_brace_escaped_quote() {
        let text = r#"{"a": "quote \" and } brace"}"#;
        assert_eq!(find_matching_brace(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn test_find_matching_brace_unbalanced() {
        assert_eq!(find_matching_brace("{\"a\": 1", 0), None);
        assert_eq!(find_matching_brace("no brace", 0), None);
    }
}
