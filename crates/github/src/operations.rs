//! Derived forge operations built on the rate-limited client.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde_json::json;

use domain::entities::Repository;
use domain::{DomainError, Result};

use crate::client::ForgeClient;
use crate::types::{
    Blob, Comment, CreateDeployment, CreateDeploymentStatus, Deployment, GitRef, PullRequestData,
    Tree,
};

/// The lifecycle config file is matched by name in the repository root tree.
static CONFIG_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.?lifecycle\.ya?ml$").unwrap());

impl ForgeClient {
    pub async fn get_pull_request(
        &self,
        repo: &Repository,
        pr_number: i32,
    ) -> Result<PullRequestData> {
        self.get(
            repo.installation_id,
            &format!("/repos/{}/pulls/{pr_number}", repo.full_name),
        )
        .await
    }

    pub async fn get_ref_for_branch(&self, repo: &Repository, branch: &str) -> Result<GitRef> {
        self.get(
            repo.installation_id,
            &format!("/repos/{}/git/ref/heads/{branch}", repo.full_name),
        )
        .await
    }

    /// Read the lifecycle YAML at a ref: list the root tree, find the entry
    /// matching the fixed name pattern, fetch and decode its blob. `None`
    /// when the repository carries no config file.
    pub async fn get_yaml_file_content(
        &self,
        repo: &Repository,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let tree: Tree = match self
            .get(
                repo.installation_id,
                &format!("/repos/{}/git/trees/{git_ref}", repo.full_name),
            )
            .await
        {
            Ok(tree) => tree,
            Err(DomainError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(entry) = tree
            .tree
            .iter()
            .find(|entry| entry.entry_type == "blob" && CONFIG_FILE.is_match(&entry.path))
        else {
            return Ok(None);
        };

        let blob: Blob = self
            .get(
                repo.installation_id,
                &format!("/repos/{}/git/blobs/{}", repo.full_name, entry.sha),
            )
            .await?;
        if blob.encoding != "base64" {
            return Err(DomainError::Transient(format!(
                "unexpected blob encoding: {}",
                blob.encoding
            )));
        }
        let compact: String = blob.content.split_whitespace().collect();
        let bytes = BASE64
            .decode(compact)
            .map_err(|e| DomainError::Validation(format!("config blob decode: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| DomainError::Validation(format!("config is not utf-8: {e}")))?;
        Ok(Some(text))
    }

    /// Fetch an issue comment body (the user-editable selection block).
    pub async fn get_comment(&self, repo: &Repository, comment_id: i64) -> Result<Comment> {
        self.get(
            repo.installation_id,
            &format!("/repos/{}/issues/comments/{comment_id}", repo.full_name),
        )
        .await
    }

    /// Create the PR comment, or edit it in place when an id is known.
    pub async fn create_or_update_pull_request_comment(
        &self,
        repo: &Repository,
        pr_number: i32,
        comment_id: Option<i64>,
        body: &str,
    ) -> Result<Comment> {
        let (method, path) = match comment_id {
            Some(id) => (
                Method::PATCH,
                format!("/repos/{}/issues/comments/{id}", repo.full_name),
            ),
            None => (
                Method::POST,
                format!("/repos/{}/issues/{pr_number}/comments", repo.full_name),
            ),
        };
        let response = self
            .request(
                repo.installation_id,
                method,
                &path,
                Some(json!({ "body": body })),
            )
            .await?;
        serde_json::from_value(response)
            .map_err(|e| DomainError::Transient(format!("comment decode: {e}")))
    }

    /// Replace the PR's label set. The response body is ignored by every
    /// caller; labels here are replacing, not additive.
    pub async fn update_labels(
        &self,
        repo: &Repository,
        pr_number: i32,
        labels: &[String],
    ) -> Result<()> {
        self.request(
            repo.installation_id,
            Method::PUT,
            &format!("/repos/{}/issues/{pr_number}/labels", repo.full_name),
            Some(json!({ "labels": labels })),
        )
        .await?;
        Ok(())
    }

    pub async fn create_deployment(
        &self,
        repo: &Repository,
        git_ref: &str,
        environment: &str,
    ) -> Result<Deployment> {
        let payload = CreateDeployment {
            git_ref,
            environment,
            auto_merge: false,
            required_contexts: &[],
            transient_environment: true,
        };
        let response = self
            .request(
                repo.installation_id,
                Method::POST,
                &format!("/repos/{}/deployments", repo.full_name),
                Some(
                    serde_json::to_value(&payload)
                        .map_err(|e| DomainError::Internal(format!("deployment encode: {e}")))?,
                ),
            )
            .await?;
        serde_json::from_value(response)
            .map_err(|e| DomainError::Transient(format!("deployment decode: {e}")))
    }

    pub async fn create_deployment_status(
        &self,
        repo: &Repository,
        deployment_id: i64,
        state: &str,
        environment_url: Option<&str>,
    ) -> Result<()> {
        let payload = CreateDeploymentStatus {
            state,
            environment_url,
            log_url: None,
        };
        self.request(
            repo.installation_id,
            Method::POST,
            &format!(
                "/repos/{}/deployments/{deployment_id}/statuses",
                repo.full_name
            ),
            Some(
                serde_json::to_value(&payload)
                    .map_err(|e| DomainError::Internal(format!("status encode: {e}")))?,
            ),
        )
        .await?;
        Ok(())
    }

    /// Remove the forge-side environment object; tolerate it already being
    /// gone (teardown is idempotent).
    pub async fn delete_environment(&self, repo: &Repository, environment: &str) -> Result<()> {
        match self
            .request(
                repo.installation_id,
                Method::DELETE,
                &format!("/repos/{}/environments/{environment}", repo.full_name),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(DomainError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_pattern_matches_expected_names() {
        for name in ["lifecycle.yaml", "lifecycle.yml", ".lifecycle.yaml"] {
            assert!(CONFIG_FILE.is_match(name), "{name}");
        }
        for name in ["lifecycle.yaml.bak", "docs/lifecycle.yaml", "Lifecycle.yaml"] {
            assert!(!CONFIG_FILE.is_match(name), "{name}");
        }
    }
}
