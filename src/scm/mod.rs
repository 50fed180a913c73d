//! Source-control host integration.
//!
//! [`ScmClient`] is the worker's seam for diff fetching and comment posting;
//! [`ScmClientFactory`] builds a client from a repository's stored
//! credentials so tests can substitute fakes.

pub mod comment;
pub mod gitlab;

pub use comment::format_review_comment;
pub use gitlab::GitLabClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScmError;
use crate::store::Repository;

/// Operations the review worker needs from a source-control host.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Fetches the full textual diff of a merge request.
    async fn fetch_diff(&self, project_id: i64, change_iid: i64) -> Result<String, ScmError>;

    /// Posts a review comment on a merge request.
    async fn post_comment(
        &self,
        project_id: i64,
        change_iid: i64,
        body: &str,
    ) -> Result<(), ScmError>;
}

/// Builds SCM clients from repository credentials.
pub trait ScmClientFactory: Send + Sync {
    fn client_for(&self, repository: &Repository) -> Arc<dyn ScmClient>;
}

/// Factory producing [`GitLabClient`]s.
#[derive(Default)]
pub struct GitLabClientFactory;

impl ScmClientFactory for GitLabClientFactory {
    fn client_for(&self, repository: &Repository) -> Arc<dyn ScmClient> {
        Arc::new(GitLabClient::new(
            repository.platform_base_url.clone(),
            repository.access_token.clone(),
        ))
    }
}
