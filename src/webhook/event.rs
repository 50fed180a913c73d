//! GitLab webhook payload types.

use serde::{Deserialize, Serialize};

/// Shallow view of any webhook payload, read before full parsing.
#[derive(Debug, Deserialize)]
pub struct EventKind {
    #[serde(default)]
    pub object_kind: String,
}

/// A merge request event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestEvent {
    #[serde(default)]
    pub object_kind: String,
    pub project: ProjectInfo,
    #[serde(default)]
    pub user: Option<UserInfo>,
    pub object_attributes: ChangeAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    /// Project id on the SCM host.
    pub id: i64,
    #[serde(default)]
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeAttributes {
    /// Merge request iid, scoped to the project.
    pub iid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub last_commit: Option<LastCommit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastCommit {
    #[serde(default)]
    pub id: String,
}

impl MergeRequestEvent {
    /// Whether this event should start a review.
    ///
    /// Only open and update actions on a currently-open merge request count;
    /// closes, merges, approvals and label churn are ignored.
    pub fn should_trigger_review(&self) -> bool {
        let attrs = &self.object_attributes;
        matches!(attrs.action.as_str(), "open" | "update") && attrs.state == "opened"
    }

    /// Flattens the payload into the descriptor ingestion works with.
    pub fn to_change_descriptor(&self) -> ChangeDescriptor {
        ChangeDescriptor {
            project_external_id: self.project.id,
            change_iid: self.object_attributes.iid,
            title: self.object_attributes.title.clone(),
            author: self
                .user
                .as_ref()
                .map(|u| u.username.clone())
                .unwrap_or_default(),
            source_branch: self.object_attributes.source_branch.clone(),
            target_branch: self.object_attributes.target_branch.clone(),
            web_url: self.object_attributes.url.clone(),
            last_commit_sha: self
                .object_attributes
                .last_commit
                .as_ref()
                .map(|c| c.id.clone())
                .unwrap_or_default(),
        }
    }
}

/// Normalized description of the change a webhook refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub project_external_id: i64,
    pub change_iid: i64,
    pub title: String,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub web_url: String,
    pub last_commit_sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(action: &str, state: &str) -> String {
        format!(
            r#"{{
                "object_kind": "merge_request",
                "project": {{"id": 314, "path_with_namespace": "acme/web"}},
                "user": {{"username": "jdoe"}},
                "object_attributes": {{
                    "iid": 7,
                    "title": "Add caching layer",
                    "state": "{state}",
                    "action": "{action}",
                    "source_branch": "feature/cache",
                    "target_branch": "main",
                    "url": "https://gitlab.example.com/acme/web/-/merge_requests/7",
                    "last_commit": {{"id": "abc123"}}
                }}
            }}"#
        )
    }

    #[test]
    fn test_trigger_predicate() {
        let open: MergeRequestEvent =
            serde_json::from_str(&sample_payload("open", "opened")).unwrap();
        assert!(open.should_trigger_review());

        let update: MergeRequestEvent =
            serde_json::from_str(&sample_payload("update", "opened")).unwrap();
        assert!(update.should_trigger_review());

        let close: MergeRequestEvent =
            serde_json::from_str(&sample_payload("close", "closed")).unwrap();
        assert!(!close.should_trigger_review());

        // Update action on an already-merged MR must not trigger.
        let stale: MergeRequestEvent =
            serde_json::from_str(&sample_payload("update", "merged")).unwrap();
        assert!(!stale.should_trigger_review());
    }

    #[test]
    fn test_change_descriptor_flattening() {
        let event: MergeRequestEvent =
            serde_json::from_str(&sample_payload("open", "opened")).unwrap();
        let change = event.to_change_descriptor();

        assert_eq!(change.project_external_id, 314);
        assert_eq!(change.change_iid, 7);
        assert_eq!(change.author, "jdoe");
        assert_eq!(change.last_commit_sha, "abc123");
        assert_eq!(change.source_branch, "feature/cache");
    }

    #[test]
    fn test_missing_optional_fields() {
        let payload = r#"{
            "object_kind": "merge_request",
            "project": {"id": 1},
            "object_attributes": {"iid": 2, "state": "opened", "action": "open"}
        }"#;

        let event: MergeRequestEvent = serde_json::from_str(payload).unwrap();
        let change = event.to_change_descriptor();
        assert_eq!(change.author, "");
        assert_eq!(change.last_commit_sha, "");
        assert!(event.should_trigger_review());
    }

    #[test]
    fn test_event_kind_shallow_parse() {
        let kind: EventKind = serde_json::from_str(r#"{"object_kind": "push", "extra": 1}"#).unwrap();
        assert_eq!(kind.object_kind, "push");
    }
}
