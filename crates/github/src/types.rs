//! Forge API payload shapes; only the fields the engine reads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryData {
    pub id: i64,
    pub full_name: String,
    pub html_url: String,
    pub owner: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestData {
    pub number: i32,
    pub title: String,
    pub state: String,
    pub merged: Option<bool>,
    pub head: BranchRef,
    pub user: User,
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: i64,
}

/// Incoming `pull_request` webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: i32,
    pub pull_request: PullRequestData,
    pub repository: RepositoryData,
    pub installation: Option<Installation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub object: GitObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitObject {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Blob {
    pub content: String,
    pub encoding: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDeployment<'a> {
    #[serde(rename = "ref")]
    pub git_ref: &'a str,
    pub environment: &'a str,
    pub auto_merge: bool,
    pub required_contexts: &'a [String],
    pub transient_environment: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDeploymentStatus<'a> {
    pub state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_url: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_payload_uses_the_ref_key() {
        let payload = CreateDeployment {
            git_ref: "abc123",
            environment: "env-tidy-otter-4f2a",
            auto_merge: false,
            required_contexts: &[],
            transient_environment: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["ref"], "abc123");
        assert_eq!(json["transient_environment"], true);
        assert!(json.get("git_ref").is_none());
    }

    #[test]
    fn deployment_status_omits_absent_urls() {
        let payload = CreateDeploymentStatus {
            state: "success",
            environment_url: None,
            log_url: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["state"], "success");
        assert!(json.get("environment_url").is_none());
        assert!(json.get("log_url").is_none());
    }
}
