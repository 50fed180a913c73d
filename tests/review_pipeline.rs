//! End-to-end pipeline tests over in-memory fakes.
//!
//! These drive the real ingestion and worker code paths against an in-memory
//! store, a scripted SCM client, and scripted LLM providers, so the whole
//! webhook -> queue -> review -> comment flow is exercised without Postgres,
//! Redis, or a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use reviewd::error::{LlmError, ScmError};
use reviewd::llm::{
    register_provider, ChatRequest, ChatResponse, ClientPool, LlmProvider, TokenUsage,
};
use reviewd::output::compute_statistics;
use reviewd::parser::NormalizedReview;
use reviewd::queue::{JobDispatcher, QueueError, ReviewJob};
use reviewd::scm::{ScmClient, ScmClientFactory};
use reviewd::store::{
    EventStatus, LlmProviderConfig, Repository, Review, ReviewContext, ReviewStore, StoreError,
    SuggestionRecord, UpsertOutcome, UsageRecord,
};
use reviewd::webhook::{ChangeDescriptor, IngestOutcome, WebhookIngestor};
use reviewd::worker::ReviewHandler;

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct EventRow {
    id: i64,
    repository_id: i64,
    commit_sha: String,
    status: EventStatus,
    error_message: Option<String>,
}

#[derive(Default)]
struct StoreState {
    repositories: Vec<Repository>,
    providers: HashMap<i64, LlmProviderConfig>,
    project_prompts: HashMap<i64, String>,
    events: Vec<EventRow>,
    reviews: Vec<Review>,
    suggestions: Vec<SuggestionRecord>,
    usage: Vec<UsageRecord>,
    next_event_id: i64,
    next_review_id: i64,
    next_suggestion_id: i64,
}

struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_event_id: 1,
                next_review_id: 1,
                next_suggestion_id: 1,
                ..Default::default()
            }),
        }
    }

    fn add_repository(&self, repository: Repository) {
        self.state.lock().unwrap().repositories.push(repository);
    }

    fn add_provider(&self, provider: LlmProviderConfig) {
        self.state
            .lock()
            .unwrap()
            .providers
            .insert(provider.id, provider);
    }

    fn review(&self, review_id: i64) -> Review {
        self.state
            .lock()
            .unwrap()
            .reviews
            .iter()
            .find(|r| r.id == review_id)
            .cloned()
            .unwrap()
    }

    fn suggestions_for(&self, review_id: i64) -> Vec<SuggestionRecord> {
        self.state
            .lock()
            .unwrap()
            .suggestions
            .iter()
            .filter(|s| s.review_id == review_id)
            .cloned()
            .collect()
    }

    fn usage_entries(&self) -> Vec<UsageRecord> {
        self.state.lock().unwrap().usage.clone()
    }

    fn event(&self, event_id: i64) -> EventRow {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .unwrap()
    }
}

fn blank_review(id: i64, repository_id: i64, change: &ChangeDescriptor) -> Review {
    Review {
        id,
        repository_id,
        change_iid: change.change_iid,
        title: change.title.clone(),
        author: change.author.clone(),
        source_branch: change.source_branch.clone(),
        target_branch: change.target_branch.clone(),
        web_url: change.web_url.clone(),
        commit_sha: change.last_commit_sha.clone(),
        status: "pending".to_string(),
        score: None,
        summary: None,
        error_message: None,
        raw_response: None,
        result_json: None,
        comment_posted: false,
        webhook_event_id: None,
        llm_provider_id: None,
        issues_found: 0,
        critical_issues_count: 0,
        high_issues_count: 0,
        medium_issues_count: 0,
        low_issues_count: 0,
        security_issues_count: 0,
        performance_issues_count: 0,
        quality_issues_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        reviewed_at: None,
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn find_repository(&self, external_id: i64) -> Result<Option<Repository>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .repositories
            .iter()
            .find(|r| r.external_id == external_id && r.is_active)
            .cloned())
    }

    async fn record_webhook_event(
        &self,
        repository_id: i64,
        change: &ChangeDescriptor,
        _payload: &serde_json::Value,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state
            .events
            .iter()
            .any(|e| e.repository_id == repository_id && e.commit_sha == change.last_commit_sha);
        if duplicate {
            return Ok(None);
        }
        let id = state.next_event_id;
        state.next_event_id += 1;
        state.events.push(EventRow {
            id,
            repository_id,
            commit_sha: change.last_commit_sha.clone(),
            status: EventStatus::Pending,
            error_message: None,
        });
        Ok(Some(id))
    }

    async fn upsert_review(
        &self,
        repository_id: i64,
        provider_id: Option<i64>,
        change: &ChangeDescriptor,
        webhook_event_id: Option<i64>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .reviews
            .iter_mut()
            .find(|r| r.repository_id == repository_id && r.change_iid == change.change_iid)
        {
            // Refresh descriptive fields only; status is never touched here.
            existing.title = change.title.clone();
            existing.author = change.author.clone();
            existing.source_branch = change.source_branch.clone();
            existing.target_branch = change.target_branch.clone();
            existing.web_url = change.web_url.clone();
            existing.commit_sha = change.last_commit_sha.clone();
            existing.webhook_event_id = webhook_event_id.or(existing.webhook_event_id);
            existing.llm_provider_id = existing.llm_provider_id.or(provider_id);
            existing.updated_at = Utc::now();
            return Ok(UpsertOutcome {
                review: existing.clone(),
                created: false,
            });
        }

        let id = state.next_review_id;
        state.next_review_id += 1;
        let mut review = blank_review(id, repository_id, change);
        review.webhook_event_id = webhook_event_id;
        review.llm_provider_id = provider_id;
        state.reviews.push(review.clone());
        Ok(UpsertOutcome {
            review,
            created: true,
        })
    }

    async fn load_context(&self, review_id: i64) -> Result<ReviewContext, StoreError> {
        let state = self.state.lock().unwrap();
        let review = state
            .reviews
            .iter()
            .find(|r| r.id == review_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "review",
                id: review_id,
            })?;
        let repository = state
            .repositories
            .iter()
            .find(|r| r.id == review.repository_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "repository",
                id: review.repository_id,
            })?;
        let provider = review
            .llm_provider_id
            .and_then(|id| state.providers.get(&id).cloned());
        let project_prompt = repository
            .project_id
            .and_then(|id| state.project_prompts.get(&id).cloned());
        Ok(ReviewContext {
            review,
            repository,
            provider,
            project_prompt,
        })
    }

    async fn load_suggestions(&self, review_id: i64) -> Result<Vec<SuggestionRecord>, StoreError> {
        Ok(self.suggestions_for(review_id))
    }

    async fn mark_processing(&self, review_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(review) = state.reviews.iter_mut().find(|r| r.id == review_id) {
            if review.status != "completed" {
                review.status = "processing".to_string();
                review.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, review_id: i64, message: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(review) = state.reviews.iter_mut().find(|r| r.id == review_id) {
            if review.status != "completed" {
                review.status = "failed".to_string();
                review.error_message = Some(message.to_string());
                review.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn reopen_for_new_commit(&self, review_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(review) = state.reviews.iter_mut().find(|r| r.id == review_id) {
            if review.status == "completed" || review.status == "failed" {
                review.status = "pending".to_string();
                review.error_message = None;
                review.comment_posted = false;
                review.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save_completed(
        &self,
        review_id: i64,
        review: &NormalizedReview,
        raw_response: &str,
        result_json: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();

        state.suggestions.retain(|s| s.review_id != review_id);
        let mut next_id = state.next_suggestion_id;
        for suggestion in &review.suggestions {
            state.suggestions.push(SuggestionRecord {
                id: next_id,
                review_id,
                file_path: suggestion.file_path.clone(),
                line_start: suggestion.line_start,
                line_end: suggestion.line_end,
                severity: suggestion.severity.as_str().to_string(),
                category: suggestion.category.as_str().to_string(),
                description: suggestion.description.clone(),
                suggestion: suggestion.suggestion.clone(),
                code_snippet: suggestion.code_snippet.clone(),
            });
            next_id += 1;
        }
        state.next_suggestion_id = next_id;

        let row = state
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or(StoreError::NotFound {
                entity: "review",
                id: review_id,
            })?;
        let stats = compute_statistics(&review.suggestions);
        row.status = "completed".to_string();
        row.score = Some(review.score);
        row.summary = Some(review.summary.clone());
        row.raw_response = Some(raw_response.to_string());
        row.result_json = Some(result_json.to_string());
        row.error_message = None;
        row.issues_found = stats.total_issues as i32;
        row.critical_issues_count = stats.by_severity.critical as i32;
        row.high_issues_count = stats.by_severity.high as i32;
        row.medium_issues_count = stats.by_severity.medium as i32;
        row.low_issues_count = stats.by_severity.low as i32;
        row.security_issues_count = stats.by_category.security as i32;
        row.performance_issues_count = stats.by_category.performance as i32;
        row.quality_issues_count = (stats.by_category.style
            + stats.by_category.logic
            + stats.by_category.documentation
            + stats.by_category.other) as i32;
        row.reviewed_at = Some(Utc::now());
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn set_comment_posted(&self, review_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(review) = state.reviews.iter_mut().find(|r| r.id == review_id) {
            review.comment_posted = true;
        }
        Ok(())
    }

    async fn update_event_status(
        &self,
        event_id: i64,
        status: EventStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.events.iter_mut().find(|e| e.id == event_id) {
            event.status = status;
            event.error_message = error_message.map(str::to_string);
        }
        Ok(())
    }

    async fn log_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.state.lock().unwrap().usage.push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted SCM client
// ---------------------------------------------------------------------------

struct ScriptedScm {
    diff: String,
    diff_fetches: AtomicUsize,
    failing_diffs: AtomicUsize,
    failing_posts: AtomicUsize,
    posted: Mutex<Vec<String>>,
}

impl ScriptedScm {
    fn new(diff: &str) -> Arc<Self> {
        Arc::new(Self {
            diff: diff.to_string(),
            diff_fetches: AtomicUsize::new(0),
            failing_diffs: AtomicUsize::new(0),
            failing_posts: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
        })
    }

    fn fail_next_diffs(&self, count: usize) {
        self.failing_diffs.store(count, Ordering::SeqCst);
    }

    fn fail_next_posts(&self, count: usize) {
        self.failing_posts.store(count, Ordering::SeqCst);
    }

    fn posted_comments(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScmClient for ScriptedScm {
    async fn fetch_diff(&self, _project_id: i64, _change_iid: i64) -> Result<String, ScmError> {
        self.diff_fetches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_diffs.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_diffs.store(remaining - 1, Ordering::SeqCst);
            return Err(ScmError::ApiError {
                status: 503,
                operation: "fetch_diff".to_string(),
                body: "service unavailable".to_string(),
            });
        }
        Ok(self.diff.clone())
    }

    async fn post_comment(
        &self,
        _project_id: i64,
        _change_iid: i64,
        body: &str,
    ) -> Result<(), ScmError> {
        let remaining = self.failing_posts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_posts.store(remaining - 1, Ordering::SeqCst);
            return Err(ScmError::ApiError {
                status: 502,
                operation: "post_comment".to_string(),
                body: "bad gateway".to_string(),
            });
        }
        self.posted.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

struct ScriptedScmFactory {
    client: Arc<ScriptedScm>,
}

impl ScmClientFactory for ScriptedScmFactory {
    fn client_for(&self, _repository: &Repository) -> Arc<dyn ScmClient> {
        Arc::clone(&self.client) as Arc<dyn ScmClient>
    }
}

// ---------------------------------------------------------------------------
// Scripted LLM provider and job dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ScriptedProvider {
    response: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            model: "scripted-model".to_string(),
            content: self.response.clone(),
            usage: TokenUsage {
                prompt_tokens: 900,
                completion_tokens: 200,
                total_tokens: 1100,
            },
        })
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Registers a provider type that always answers with `response`.
fn register_scripted(provider_type: &str, response: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let response = response.to_string();
    let counter = Arc::clone(&calls);
    register_provider(
        provider_type,
        Arc::new(move |_config| {
            Ok(Arc::new(ScriptedProvider {
                response: response.clone(),
                calls: Arc::clone(&counter),
            }) as Arc<dyn LlmProvider>)
        }),
    );
    calls
}

#[derive(Default)]
struct RecordingDispatcher {
    jobs: Mutex<Vec<ReviewJob>>,
}

impl RecordingDispatcher {
    fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job: ReviewJob) -> Result<Uuid, QueueError> {
        let id = job.id;
        self.jobs.lock().unwrap().push(job);
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const DIFF: &str = "--- a/src/auth.rs\n+++ b/src/auth.rs\n+fn check(token: &str) -> bool { token == SECRET }\n";

fn repository() -> Repository {
    Repository {
        id: 1,
        external_id: 314,
        name: "acme/web".to_string(),
        platform_base_url: "https://gitlab.example.com".to_string(),
        access_token: "glpat-test".to_string(),
        webhook_secret: Some("s3cret".to_string()),
        llm_provider_id: Some(10),
        review_prompt: None,
        project_id: None,
        is_active: true,
    }
}

fn provider(provider_type: &str) -> LlmProviderConfig {
    LlmProviderConfig {
        id: 10,
        name: "primary".to_string(),
        provider_type: provider_type.to_string(),
        base_url: "https://api.example.com/v1".to_string(),
        api_key: "key".to_string(),
        model: "review-model".to_string(),
    }
}

fn webhook_body(commit_sha: &str, title: &str) -> String {
    format!(
        r#"{{
            "object_kind": "merge_request",
            "project": {{"id": 314, "path_with_namespace": "acme/web"}},
            "user": {{"username": "jdoe"}},
            "object_attributes": {{
                "iid": 7,
                "title": "{title}",
                "state": "opened",
                "action": "open",
                "source_branch": "feature/auth",
                "target_branch": "main",
                "url": "https://gitlab.example.com/acme/web/-/merge_requests/7",
                "last_commit": {{"id": "{commit_sha}"}}
            }}
        }}"#
    )
}

const JSON_RESPONSE: &str = r#"{
    "summary": "Solid change, one security issue.",
    "score": 82,
    "suggestions": [
        {
            "file_path": "src/auth.rs",
            "line_start": 1,
            "line_end": 1,
            "severity": "high",
            "category": "security",
            "description": "Token compared with ==, which leaks timing.",
            "suggestion": "Use a constant-time comparison."
        }
    ]
}"#;

struct Pipeline {
    store: Arc<MemoryStore>,
    dispatcher: Arc<RecordingDispatcher>,
    scm: Arc<ScriptedScm>,
    ingestor: WebhookIngestor,
    handler: ReviewHandler,
}

fn pipeline(provider_type: &str) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    store.add_repository(repository());
    store.add_provider(provider(provider_type));

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scm = ScriptedScm::new(DIFF);

    let ingestor = WebhookIngestor::new(
        Arc::clone(&store) as Arc<dyn ReviewStore>,
        Arc::clone(&dispatcher) as Arc<dyn JobDispatcher>,
        3,
    );
    let handler = ReviewHandler::new(
        Arc::clone(&store) as Arc<dyn ReviewStore>,
        Arc::new(ScriptedScmFactory {
            client: Arc::clone(&scm),
        }),
        Arc::new(ClientPool::new()),
    );

    Pipeline {
        store,
        dispatcher,
        scm,
        ingestor,
        handler,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_webhook_to_comment() {
    register_scripted("pipeline-happy", JSON_RESPONSE);
    let p = pipeline("pipeline-happy");

    let outcome = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();

    let review_id = match outcome {
        IngestOutcome::Accepted {
            review_id,
            job_id: Some(_),
        } => review_id,
        other => panic!("expected accepted delivery with job, got {other:?}"),
    };
    assert_eq!(p.dispatcher.job_count(), 1);

    p.handler.process(review_id).await.unwrap();

    let review = p.store.review(review_id);
    assert_eq!(review.status, "completed");
    assert_eq!(review.score, Some(82));
    assert!(review.comment_posted);
    assert_eq!(
        review.summary.as_deref(),
        Some("Solid change, one security issue.")
    );

    let suggestions = p.store.suggestions_for(review_id);
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].file_path, "src/auth.rs");
    assert_eq!(suggestions[0].severity, "high");
    assert_eq!(suggestions[0].category, "security");

    // Aggregate counters land on the review row with the suggestions.
    assert_eq!(review.issues_found, 1);
    assert_eq!(review.high_issues_count, 1);
    assert_eq!(review.security_issues_count, 1);
    assert_eq!(review.critical_issues_count, 0);
    assert_eq!(review.quality_issues_count, 0);

    // Document is versioned, carries the suggestion, and records the model.
    let document: serde_json::Value =
        serde_json::from_str(review.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(document["schema_version"], "1.0");
    assert_eq!(document["result"]["score"], 82);
    assert_eq!(document["result"]["quality_level"], "good");
    assert_eq!(document["context"]["model"], "scripted-model");
    assert_eq!(document["metadata"]["fallback_used"], false);
    assert_eq!(document["statistics"]["total_issues"], 1);
    assert_eq!(document["statistics"]["by_severity"]["high"], 1);

    let comments = p.scm.posted_comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("src/auth.rs"));

    // Exactly one successful usage entry.
    let usage = p.store.usage_entries();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].total_tokens, 1100);

    // The originating webhook event is settled.
    let event_id = review.webhook_event_id.unwrap();
    assert_eq!(p.store.event(event_id).status, EventStatus::Completed);
}

#[tokio::test]
async fn duplicate_delivery_refreshes_without_second_job() {
    register_scripted("pipeline-dup", JSON_RESPONSE);
    let p = pipeline("pipeline-dup");

    let first = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Initial title"))
        .await
        .unwrap();
    let review_id = match first {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };
    p.handler.process(review_id).await.unwrap();
    assert_eq!(p.store.review(review_id).status, "completed");

    // Same commit again: fields refresh, status and queue are untouched.
    let second = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Amended title"))
        .await
        .unwrap();
    match second {
        IngestOutcome::Accepted {
            review_id: second_id,
            job_id: None,
        } => assert_eq!(second_id, review_id),
        other => panic!("expected refresh without a job, got {other:?}"),
    }

    let review = p.store.review(review_id);
    assert_eq!(review.title, "Amended title");
    assert_eq!(review.status, "completed");
    assert_eq!(p.dispatcher.job_count(), 1);
}

#[tokio::test]
async fn new_commit_reopens_failed_review() {
    register_scripted("pipeline-reopen", JSON_RESPONSE);
    let p = pipeline("pipeline-reopen");
    p.scm.fail_next_diffs(1);

    let first = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    let review_id = match first {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };
    p.handler.process(review_id).await.unwrap_err();
    assert_eq!(p.store.review(review_id).status, "failed");

    // A push with a new head commit reopens the review and enqueues again.
    let second = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("def456", "Add auth check"))
        .await
        .unwrap();
    match second {
        IngestOutcome::Accepted {
            review_id: second_id,
            job_id: Some(_),
        } => assert_eq!(second_id, review_id),
        other => panic!("expected reopened review with a job, got {other:?}"),
    }
    assert_eq!(p.dispatcher.job_count(), 2);

    let review = p.store.review(review_id);
    assert_eq!(review.status, "pending");
    assert_eq!(review.error_message, None);
    assert_eq!(review.commit_sha, "def456");

    p.handler.process(review_id).await.unwrap();
    assert_eq!(p.store.review(review_id).status, "completed");
}

#[tokio::test]
async fn new_commit_on_completed_change_runs_fresh_review() {
    let calls = register_scripted("pipeline-recommit", JSON_RESPONSE);
    let p = pipeline("pipeline-recommit");

    let first = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    let review_id = match first {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };
    p.handler.process(review_id).await.unwrap();
    assert_eq!(p.store.review(review_id).status, "completed");

    let second = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("def456", "Address feedback"))
        .await
        .unwrap();
    match second {
        IngestOutcome::Accepted {
            job_id: Some(_), ..
        } => {}
        other => panic!("expected a fresh job for the new commit, got {other:?}"),
    }
    assert_eq!(p.dispatcher.job_count(), 2);

    p.handler.process(review_id).await.unwrap();

    let review = p.store.review(review_id);
    assert_eq!(review.status, "completed");
    assert!(review.comment_posted);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(p.scm.posted_comments().len(), 2);
    // Suggestions were replaced, not accumulated.
    assert_eq!(p.store.suggestions_for(review_id).len(), 1);
}

#[tokio::test]
async fn new_commit_while_in_flight_keeps_single_job() {
    register_scripted("pipeline-inflight", JSON_RESPONSE);
    let p = pipeline("pipeline-inflight");

    let first = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    let review_id = match first {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };

    // Second commit lands before the first job runs: the row refreshes so
    // the queued job picks up the new head, but no second job is enqueued.
    let second = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("def456", "Add auth check"))
        .await
        .unwrap();
    match second {
        IngestOutcome::Accepted {
            review_id: second_id,
            job_id: None,
        } => assert_eq!(second_id, review_id),
        other => panic!("expected refresh without a job, got {other:?}"),
    }
    assert_eq!(p.dispatcher.job_count(), 1);

    let review = p.store.review(review_id);
    assert_eq!(review.status, "pending");
    assert_eq!(review.commit_sha, "def456");
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    register_scripted("pipeline-token", JSON_RESPONSE);
    let p = pipeline("pipeline-token");

    let outcome = p
        .ingestor
        .ingest(Some("wrong"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        IngestOutcome::Rejected(reviewd::webhook::RejectReason::InvalidToken)
    ));
    assert_eq!(p.dispatcher.job_count(), 0);
}

#[tokio::test]
async fn free_text_response_completes_via_fallback() {
    // The sampling parameters echoed back as fenced JSON must not win over
    // the prose review.
    let prose = "Overall this looks reasonable and well tested.\n\n\
        ```json\n{\"temperature\": 0.2, \"max_tokens\": 800}\n```\n\n\
        Score: 75/100\n\n\
        - Consider renaming check() in src/auth.rs line 1 for clarity\n\
        - Add a test for the empty-token case\n";
    register_scripted("pipeline-prose", prose);
    let p = pipeline("pipeline-prose");

    let outcome = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("def456", "Add auth check"))
        .await
        .unwrap();
    let review_id = match outcome {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };

    p.handler.process(review_id).await.unwrap();

    let review = p.store.review(review_id);
    assert_eq!(review.status, "completed");
    assert_eq!(review.score, Some(75));
    assert!(review.comment_posted);

    let document: serde_json::Value =
        serde_json::from_str(review.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(document["metadata"]["fallback_used"], true);
}

#[tokio::test]
async fn comment_failure_retries_without_rerunning_llm() {
    let calls = register_scripted("pipeline-retry", JSON_RESPONSE);
    let p = pipeline("pipeline-retry");
    p.scm.fail_next_posts(1);

    let outcome = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    let review_id = match outcome {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };

    // First attempt: review persists, comment post fails, error propagates.
    let err = p.handler.process(review_id).await.unwrap_err();
    assert!(!err.is_permanent());

    let review = p.store.review(review_id);
    assert_eq!(review.status, "completed");
    assert!(!review.comment_posted);
    assert_eq!(p.store.suggestions_for(review_id).len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Retry: resumes at the comment step from stored rows.
    p.handler.process(review_id).await.unwrap();

    let review = p.store.review(review_id);
    assert!(review.comment_posted);
    assert_eq!(p.store.suggestions_for(review_id).len(), 1);
    assert_eq!(p.scm.posted_comments().len(), 1);
    // The LLM was not called again and the diff was not re-fetched.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.scm.diff_fetches.load(Ordering::SeqCst), 1);

    // A third delivery of the job is a no-op.
    p.handler.process(review_id).await.unwrap();
    assert_eq!(p.scm.posted_comments().len(), 1);
}

#[tokio::test]
async fn diff_fetch_failure_fails_review_without_llm_call() {
    let calls = register_scripted("pipeline-nodiff", JSON_RESPONSE);
    let p = pipeline("pipeline-nodiff");
    p.scm.fail_next_diffs(1);

    let outcome = p
        .ingestor
        .ingest(Some("s3cret"), &webhook_body("abc123", "Add auth check"))
        .await
        .unwrap();
    let review_id = match outcome {
        IngestOutcome::Accepted { review_id, .. } => review_id,
        other => panic!("unexpected outcome {other:?}"),
    };

    let err = p.handler.process(review_id).await.unwrap_err();
    // API failures are worth a redelivery.
    assert!(!err.is_permanent());

    let review = p.store.review(review_id);
    assert_eq!(review.status, "failed");
    assert!(review.error_message.as_deref().unwrap().contains("diff"));
    // The pipeline stopped before the LLM step.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(p.store.suggestions_for(review_id).is_empty());
    assert!(p.scm.posted_comments().is_empty());
    assert!(p.store.usage_entries().is_empty());

    // The triggering event records the failure.
    let event_id = review.webhook_event_id.unwrap();
    assert_eq!(p.store.event(event_id).status, EventStatus::Failed);
}
