//! GitLab REST client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::ScmError;

use super::ScmClient;

/// HTTP timeout for GitLab requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the GitLab v4 API, authenticated with a private token.
pub struct GitLabClient {
    base_url: String,
    token: String,
    http_client: Client,
}

/// Subset of the merge request changes response.
#[derive(Debug, Deserialize)]
struct ChangesResponse {
    changes: Vec<FileChange>,
}

#[derive(Debug, Deserialize)]
struct FileChange {
    old_path: String,
    new_path: String,
    #[serde(default)]
    diff: String,
}

impl GitLabClient {
    /// Creates a client for a GitLab instance.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http_client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path)
    }
}

#[async_trait]
impl ScmClient for GitLabClient {
    /// Fetches the merge request diff as one concatenated text.
    ///
    /// Per-file diffs are joined with `--- a/…` / `+++ b/…` headers so the
    /// model sees file boundaries.
    async fn fetch_diff(&self, project_id: i64, change_iid: i64) -> Result<String, ScmError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}/changes",
            project_id, change_iid
        ));

        let response = self
            .http_client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScmError::ApiError {
                status: status.as_u16(),
                operation: format!("fetch diff for !{}", change_iid),
                body,
            });
        }

        let changes: ChangesResponse = response.json().await?;

        let mut diff = String::new();
        for change in &changes.changes {
            if change.diff.is_empty() {
                continue;
            }
            diff.push_str(&format!(
                "--- a/{}\n+++ b/{}\n",
                change.old_path, change.new_path
            ));
            diff.push_str(&change.diff);
            if !change.diff.ends_with('\n') {
                diff.push('\n');
            }
        }

        if diff.trim().is_empty() {
            return Err(ScmError::EmptyDiff { change_iid });
        }

        debug!(
            project_id = project_id,
            change_iid = change_iid,
            files = changes.changes.len(),
            bytes = diff.len(),
            "Fetched merge request diff"
        );
        Ok(diff)
    }

    /// Posts a note on the merge request. GitLab answers 201 on success.
    async fn post_comment(
        &self,
        project_id: i64,
        change_iid: i64,
        body: &str,
    ) -> Result<(), ScmError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}/notes",
            project_id, change_iid
        ));

        let response = self
            .http_client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 201 {
            let body = response.text().await.unwrap_or_default();
            return Err(ScmError::ApiError {
                status: status.as_u16(),
                operation: format!("post comment on !{}", change_iid),
                body,
            });
        }

        debug!(
            project_id = project_id,
            change_iid = change_iid,
            "Posted review comment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_construction() {
        let client = GitLabClient::new("https://gitlab.example.com/", "token");
        assert_eq!(
            client.api_url("projects/5/merge_requests/3/changes"),
            "https://gitlab.example.com/api/v4/projects/5/merge_requests/3/changes"
        );
    }

    #[test]
    fn test_changes_response_parsing() {
        let body = r#"{
            "changes": [
                {"old_path": "a.rs", "new_path": "a.rs", "diff": "@@ -1 +1 @@\n-x\n+y\n"},
                {"old_path": "b.rs", "new_path": "c.rs"}
            ]
        }"#;

        let parsed: ChangesResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.changes.len(), 2);
        assert_eq!(parsed.changes[1].new_path, "c.rs");
        assert!(parsed.changes[1].diff.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_diff_connection_error() {
        let client = GitLabClient::new("http://localhost:65535", "token");
        let result = client.fetch_diff(1, 2).await;
        assert!(matches!(result, Err(ScmError::RequestFailed(_))));
    }
}
