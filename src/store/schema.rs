//! Database schema definitions.
//!
//! All statements are idempotent (`IF NOT EXISTS`) so `apply_schema` can run
//! on every startup. Schema changes are append-only: new columns and tables
//! get new statements rather than edits to existing ones.

use sqlx::PgPool;

use super::StoreError;

/// Registered repositories with flattened platform credentials.
pub const CREATE_REPOSITORIES: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id BIGSERIAL PRIMARY KEY,
    external_id BIGINT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    platform_base_url TEXT NOT NULL,
    access_token TEXT NOT NULL,
    webhook_secret TEXT,
    llm_provider_id BIGINT,
    review_prompt TEXT,
    project_id BIGINT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Project-level settings, currently just the prompt override.
pub const CREATE_PROJECT_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS project_settings (
    id BIGSERIAL PRIMARY KEY,
    project_id BIGINT NOT NULL UNIQUE,
    review_prompt TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// LLM provider configurations.
pub const CREATE_LLM_PROVIDERS: &str = r#"
CREATE TABLE IF NOT EXISTS llm_providers (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    provider_type TEXT NOT NULL,
    base_url TEXT NOT NULL,
    api_key TEXT NOT NULL,
    model TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Review rows, one per (repository, change) pair.
pub const CREATE_REVIEWS: &str = r#"
CREATE TABLE IF NOT EXISTS reviews (
    id BIGSERIAL PRIMARY KEY,
    repository_id BIGINT NOT NULL REFERENCES repositories(id),
    change_iid BIGINT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    source_branch TEXT NOT NULL DEFAULT '',
    target_branch TEXT NOT NULL DEFAULT '',
    web_url TEXT NOT NULL DEFAULT '',
    commit_sha TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    score INT,
    summary TEXT,
    error_message TEXT,
    raw_response TEXT,
    result_json TEXT,
    comment_posted BOOLEAN NOT NULL DEFAULT FALSE,
    webhook_event_id BIGINT,
    llm_provider_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    reviewed_at TIMESTAMPTZ,
    UNIQUE (repository_id, change_iid)
)
"#;

pub const CREATE_REVIEWS_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status)";

/// Aggregate issue counters on the review row, written in the same
/// transaction as the suggestions they summarize.
pub const ADD_REVIEW_COUNTERS: &str = r#"
ALTER TABLE reviews
    ADD COLUMN IF NOT EXISTS issues_found INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS critical_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS high_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS medium_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS low_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS security_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS performance_issues_count INT NOT NULL DEFAULT 0,
    ADD COLUMN IF NOT EXISTS quality_issues_count INT NOT NULL DEFAULT 0
"#;

/// Suggestion rows, replaced wholesale whenever a review completes.
pub const CREATE_SUGGESTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS suggestions (
    id BIGSERIAL PRIMARY KEY,
    review_id BIGINT NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
    file_path TEXT NOT NULL DEFAULT '',
    line_start INT NOT NULL DEFAULT 0,
    line_end INT NOT NULL DEFAULT 0,
    severity TEXT NOT NULL DEFAULT 'medium',
    category TEXT NOT NULL DEFAULT 'other',
    description TEXT NOT NULL DEFAULT '',
    suggestion TEXT NOT NULL DEFAULT '',
    code_snippet TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_SUGGESTIONS_REVIEW_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_suggestions_review ON suggestions(review_id)";

/// Webhook deliveries; the (repository, commit) uniqueness powers dedup.
pub const CREATE_WEBHOOK_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_events (
    id BIGSERIAL PRIMARY KEY,
    repository_id BIGINT NOT NULL REFERENCES repositories(id),
    event_type TEXT NOT NULL,
    commit_sha TEXT NOT NULL,
    payload JSONB,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (repository_id, commit_sha)
)
"#;

/// Per-request LLM usage accounting.
pub const CREATE_LLM_USAGE_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS llm_usage_logs (
    id BIGSERIAL PRIMARY KEY,
    review_id BIGINT,
    repository_id BIGINT NOT NULL,
    provider_id BIGINT NOT NULL,
    model TEXT NOT NULL,
    request_type TEXT NOT NULL DEFAULT 'code_review',
    status TEXT NOT NULL,
    prompt_tokens BIGINT NOT NULL DEFAULT 0,
    completion_tokens BIGINT NOT NULL DEFAULT 0,
    total_tokens BIGINT NOT NULL DEFAULT 0,
    duration_ms BIGINT NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// All schema statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_REPOSITORIES,
        CREATE_PROJECT_SETTINGS,
        CREATE_LLM_PROVIDERS,
        CREATE_REVIEWS,
        CREATE_REVIEWS_STATUS_INDEX,
        ADD_REVIEW_COUNTERS,
        CREATE_SUGGESTIONS,
        CREATE_SUGGESTIONS_REVIEW_INDEX,
        CREATE_WEBHOOK_EVENTS,
        CREATE_LLM_USAGE_LOGS,
    ]
}

/// Applies the full schema to the database.
///
/// Safe to call on every startup.
///
/// # Errors
///
/// Returns `StoreError::QueryFailed` if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in all_schema_statements() {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(
        statements = all_schema_statements().len(),
        "Database schema applied"
    );
    Ok(())
}
