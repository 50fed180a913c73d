//! Markdown rendering of a review for the merge request comment.

use crate::output::quality_level;
use crate::parser::{NormalizedReview, Severity, UNKNOWN_FILE};

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "🔵",
    }
}

/// Renders the review as a merge request comment.
///
/// Deterministic for a given review; rendering the same stored rows again
/// (e.g. on a comment-post retry) produces the same comment.
pub fn format_review_comment(review: &NormalizedReview) -> String {
    let mut out = String::new();

    out.push_str("## 🤖 Automated Code Review\n\n");
    out.push_str(&format!(
        "**Score:** {}/100 ({})\n\n",
        review.score,
        quality_level(review.score)
    ));
    out.push_str(&review.summary);
    out.push_str("\n\n");

    if review.suggestions.is_empty() {
        out.push_str("No issues found. 🎉\n");
        return out;
    }

    out.push_str(&format!("### Suggestions ({})\n\n", review.suggestions.len()));

    for (i, s) in review.suggestions.iter().enumerate() {
        let location = if s.file_path == UNKNOWN_FILE {
            String::new()
        } else if s.line_start > 0 && s.line_end > s.line_start {
            format!(" `{}` (lines {}-{})", s.file_path, s.line_start, s.line_end)
        } else if s.line_start > 0 {
            format!(" `{}` (line {})", s.file_path, s.line_start)
        } else {
            format!(" `{}`", s.file_path)
        };

        out.push_str(&format!(
            "**{}. {}{}** · {} / {}\n\n",
            i + 1,
            severity_marker(s.severity),
            location,
            s.severity,
            s.category
        ));
        out.push_str(&s.description);
        out.push('\n');

        if !s.suggestion.is_empty() {
            out.push_str(&format!("\n*Suggested fix:* {}\n", s.suggestion));
        }
        if let Some(snippet) = &s.code_snippet {
            out.push_str(&format!("\n```\n{}\n```\n", snippet.trim_end()));
        }
        out.push('\n');
    }

    out
}
