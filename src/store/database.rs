//! PostgreSQL implementation of the review store.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::output::compute_statistics;
use crate::parser::NormalizedReview;
use crate::webhook::ChangeDescriptor;

use super::models::{
    EventStatus, LlmProviderConfig, Repository, Review, ReviewContext, SuggestionRecord,
    UpsertOutcome, UsageRecord,
};
use super::{schema, ReviewStore, StoreError};

/// Idempotent review upsert.
///
/// Only descriptive fields are touched on conflict; status stays wherever the
/// state machine left it, so a redelivered webhook can never reset a review
/// that is processing or already finished. `xmax = 0` distinguishes a fresh
/// insert from a refresh.
const UPSERT_REVIEW_SQL: &str = r#"
INSERT INTO reviews (
    repository_id, change_iid, title, author, source_branch, target_branch,
    web_url, commit_sha, webhook_event_id, llm_provider_id
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT (repository_id, change_iid) DO UPDATE SET
    title = EXCLUDED.title,
    author = EXCLUDED.author,
    source_branch = EXCLUDED.source_branch,
    target_branch = EXCLUDED.target_branch,
    web_url = EXCLUDED.web_url,
    commit_sha = EXCLUDED.commit_sha,
    webhook_event_id = COALESCE(EXCLUDED.webhook_event_id, reviews.webhook_event_id),
    llm_provider_id = COALESCE(EXCLUDED.llm_provider_id, reviews.llm_provider_id),
    updated_at = NOW()
RETURNING id, (xmax = 0) AS inserted
"#;

/// Completion update, run inside the same transaction as the suggestion
/// rewrite so the aggregate counters can never disagree with the rows they
/// summarize.
const COMPLETE_REVIEW_SQL: &str = r#"
UPDATE reviews SET
    status = 'completed',
    score = $2,
    summary = $3,
    raw_response = $4,
    result_json = $5,
    error_message = NULL,
    issues_found = $6,
    critical_issues_count = $7,
    high_issues_count = $8,
    medium_issues_count = $9,
    low_issues_count = $10,
    security_issues_count = $11,
    performance_issues_count = $12,
    quality_issues_count = $13,
    reviewed_at = NOW(),
    updated_at = NOW()
WHERE id = $1
"#;

/// PostgreSQL-backed review store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to PostgreSQL with a bounded connection pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the pool cannot be built.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the database schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if a schema statement fails.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        schema::apply_schema(&self.pool).await
    }

    async fn get_review(&self, review_id: i64) -> Result<Option<Review>, StoreError> {
        let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
            .bind(review_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(review)
    }
}

#[async_trait]
impl ReviewStore for Database {
    async fn find_repository(&self, external_id: i64) -> Result<Option<Repository>, StoreError> {
        let repo = sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE external_id = $1 AND is_active = TRUE",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(repo)
    }

    async fn record_webhook_event(
        &self,
        repository_id: i64,
        change: &ChangeDescriptor,
        payload: &serde_json::Value,
    ) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO webhook_events (repository_id, event_type, commit_sha, payload)
            VALUES ($1, 'merge_request', $2, $3)
            ON CONFLICT (repository_id, commit_sha) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(repository_id)
        .bind(&change.last_commit_sha)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn upsert_review(
        &self,
        repository_id: i64,
        provider_id: Option<i64>,
        change: &ChangeDescriptor,
        webhook_event_id: Option<i64>,
    ) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(UPSERT_REVIEW_SQL)
            .bind(repository_id)
            .bind(change.change_iid)
            .bind(&change.title)
            .bind(&change.author)
            .bind(&change.source_branch)
            .bind(&change.target_branch)
            .bind(&change.web_url)
            .bind(&change.last_commit_sha)
            .bind(webhook_event_id)
            .bind(provider_id)
            .fetch_one(&self.pool)
            .await?;

        let review_id: i64 = row.get("id");
        let created: bool = row.get("inserted");

        let review = self
            .get_review(review_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "review",
                id: review_id,
            })?;

        debug!(
            review_id = review_id,
            created = created,
            change_iid = change.change_iid,
            "Review upserted"
        );

        Ok(UpsertOutcome { review, created })
    }

    async fn load_context(&self, review_id: i64) -> Result<ReviewContext, StoreError> {
        let review = self
            .get_review(review_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "review",
                id: review_id,
            })?;

        let repository =
            sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
                .bind(review.repository_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound {
                    entity: "repository",
                    id: review.repository_id,
                })?;

        let provider = match repository.llm_provider_id {
            Some(provider_id) => {
                sqlx::query_as::<_, LlmProviderConfig>(
                    "SELECT * FROM llm_providers WHERE id = $1",
                )
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => None,
        };

        let project_prompt = match repository.project_id {
            Some(project_id) => sqlx::query_scalar::<_, Option<String>>(
                "SELECT review_prompt FROM project_settings WHERE project_id = $1",
            )
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .flatten(),
            None => None,
        };

        Ok(ReviewContext {
            review,
            repository,
            provider,
            project_prompt,
        })
    }

    async fn load_suggestions(&self, review_id: i64) -> Result<Vec<SuggestionRecord>, StoreError> {
        let suggestions = sqlx::query_as::<_, SuggestionRecord>(
            "SELECT * FROM suggestions WHERE review_id = $1 ORDER BY id",
        )
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(suggestions)
    }

    async fn mark_processing(&self, review_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE reviews SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            "#,
        )
        .bind(review_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, review_id: i64, message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE reviews SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            "#,
        )
        .bind(review_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reopen_for_new_commit(&self, review_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reviews SET
                status = 'pending',
                error_message = NULL,
                comment_posted = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('completed', 'failed')
            "#,
        )
        .bind(review_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_completed(
        &self,
        review_id: i64,
        review: &NormalizedReview,
        raw_response: &str,
        result_json: &str,
    ) -> Result<(), StoreError> {
        let stats = compute_statistics(&review.suggestions);
        let by_severity = &stats.by_severity;
        let by_category = &stats.by_category;
        // Style, logic, documentation, and uncategorized issues all count as
        // general quality findings.
        let quality_count =
            by_category.style + by_category.logic + by_category.documentation + by_category.other;

        let mut tx = self.pool.begin().await?;

        sqlx::query(COMPLETE_REVIEW_SQL)
            .bind(review_id)
            .bind(review.score)
            .bind(&review.summary)
            .bind(raw_response)
            .bind(result_json)
            .bind(stats.total_issues as i32)
            .bind(by_severity.critical as i32)
            .bind(by_severity.high as i32)
            .bind(by_severity.medium as i32)
            .bind(by_severity.low as i32)
            .bind(by_category.security as i32)
            .bind(by_category.performance as i32)
            .bind(quality_count as i32)
            .execute(&mut *tx)
            .await?;

        // Replace suggestions wholesale so a re-run never duplicates rows.
        sqlx::query("DELETE FROM suggestions WHERE review_id = $1")
            .bind(review_id)
            .execute(&mut *tx)
            .await?;

        for s in &review.suggestions {
            sqlx::query(
                r#"
                INSERT INTO suggestions (
                    review_id, file_path, line_start, line_end, severity,
                    category, description, suggestion, code_snippet
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(review_id)
            .bind(&s.file_path)
            .bind(s.line_start)
            .bind(s.line_end)
            .bind(s.severity.as_str())
            .bind(s.category.as_str())
            .bind(&s.description)
            .bind(&s.suggestion)
            .bind(&s.code_snippet)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            review_id = review_id,
            score = review.score,
            suggestions = review.suggestions.len(),
            "Review results saved"
        );
        Ok(())
    }

    async fn set_comment_posted(&self, review_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE reviews SET comment_posted = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_events SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO llm_usage_logs (
                review_id, repository_id, provider_id, model, status,
                prompt_tokens, completion_tokens, total_tokens, duration_ms, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.review_id)
        .bind(record.repository_id)
        .bind(record.provider_id)
        .bind(&record.model)
        .bind(record.status.as_str())
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens)
        .bind(record.duration_ms)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_never_touches_status() {
        // The conflict branch must not assign the status column.
        let update_clause = UPSERT_REVIEW_SQL
            .split("DO UPDATE SET")
            .nth(1)
            .expect("upsert has a conflict clause");
        assert!(!update_clause.contains("status ="));
    }

    #[test]
    fn test_upsert_reports_insertion() {
        assert!(UPSERT_REVIEW_SQL.contains("(xmax = 0) AS inserted"));
    }

    #[test]
    fn test_completion_writes_aggregate_counters() {
        for column in [
            "issues_found",
            "critical_issues_count",
            "high_issues_count",
            "medium_issues_count",
            "low_issues_count",
            "security_issues_count",
            "performance_issues_count",
            "quality_issues_count",
        ] {
            assert!(
                COMPLETE_REVIEW_SQL.contains(&format!("{column} = $")),
                "completion update must set {}",
                column
            );
        }
    }
}
