//! Review prompt templates.
//!
//! Prompt precedence is repository override, then project override, then the
//! built-in default. Overrides must carry the diff placeholder; an override
//! without it is skipped rather than sent, since a prompt that never shows
//! the model the diff cannot produce a review.

/// Placeholder replaced with the merge request diff.
pub const DIFF_PLACEHOLDER: &str = "{{diff}}";

/// System message sent with every review request.
pub const REVIEW_SYSTEM_PROMPT: &str = "You are an expert code reviewer. Analyze the provided \
    diff carefully and respond with a single JSON object, no surrounding prose.";

/// Built-in review prompt.
pub const DEFAULT_REVIEW_PROMPT: &str = r#"Review the following merge request.

Title: {{title}}
Branches: {{source_branch}} -> {{target_branch}}

Respond with a JSON object of this exact shape:
{
  "summary": "<one-paragraph overall assessment>",
  "score": <integer 0-100, overall quality>,
  "suggestions": [
    {
      "file_path": "<path of the affected file>",
      "line_start": <first affected line>,
      "line_end": <last affected line>,
      "severity": "critical|high|medium|low",
      "category": "security|performance|style|logic|documentation|other",
      "description": "<what is wrong>",
      "suggestion": "<how to fix it>",
      "code_snippet": "<optional corrected code>"
    }
  ]
}

Only report issues you are confident about. An empty suggestions array is a
valid answer for a clean change.

Diff:
{{diff}}
"#;

/// Where the effective prompt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Repository,
    Project,
    Default,
}

impl PromptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Project => "project",
            Self::Default => "default",
        }
    }
}

/// Values substituted into a prompt template.
#[derive(Debug, Clone, Default)]
pub struct PromptData {
    pub diff: String,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
}

/// Whether a template is usable as a review prompt.
pub fn validate_template(template: &str) -> bool {
    !template.trim().is_empty() && template.contains(DIFF_PLACEHOLDER)
}

/// Picks the effective template by precedence.
///
/// Overrides failing [`validate_template`] are skipped.
pub fn resolve_template(
    repository_prompt: Option<&str>,
    project_prompt: Option<&str>,
) -> (String, PromptSource) {
    if let Some(prompt) = repository_prompt {
        if validate_template(prompt) {
            return (prompt.to_string(), PromptSource::Repository);
        }
    }
    if let Some(prompt) = project_prompt {
        if validate_template(prompt) {
            return (prompt.to_string(), PromptSource::Project);
        }
    }
    (DEFAULT_REVIEW_PROMPT.to_string(), PromptSource::Default)
}

/// Substitutes prompt data into a template.
pub fn render(template: &str, data: &PromptData) -> String {
    template
        .replace("{{title}}", &data.title)
        .replace("{{source_branch}}", &data.source_branch)
        .replace("{{target_branch}}", &data.target_branch)
        .replace(DIFF_PLACEHOLDER, &data.diff)
}
