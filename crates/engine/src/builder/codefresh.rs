//! External-CI image builds.
//!
//! Generates a single-file pipeline spec, hands it to the runner CLI, and
//! polls the resulting pipeline to a terminal state. The runner resolves
//! `${{KEY}}` build-arg placeholders from the rendered env map on its side.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use domain::{DomainError, Result};

use super::{ImageBuildOutcome, ImageBuildRequest, ImageBuilder, PipelineStatus};

static PIPELINE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-f]{24}\b").unwrap());

#[derive(Debug, Clone)]
pub struct CodefreshCli {
    binary: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl Default for CodefreshCli {
    fn default() -> Self {
        CodefreshCli {
            binary: "codefresh".to_string(),
            poll_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(2700),
        }
    }
}

impl CodefreshCli {
    pub fn new(binary: &str, poll_interval: Duration, poll_timeout: Duration) -> Self {
        CodefreshCli {
            binary: binary.to_string(),
            poll_interval,
            poll_timeout,
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| DomainError::Transient(format!("codefresh exec: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::Transient(format!(
                "codefresh {}: {stderr}",
                args.first().unwrap_or(&"")
            )));
        }
        Ok(stdout)
    }

    /// Submit a single-file pipeline spec; returns the 24-hex pipeline id
    /// printed by the runner.
    pub async fn run_spec(&self, spec_path: &std::path::Path) -> Result<String> {
        let path = spec_path.to_string_lossy().to_string();
        let stdout = self.exec(&["run", "--detach", "-f", &path]).await?;
        extract_pipeline_id(&stdout)
    }

    /// Trigger an existing pipeline by id (webhook path); returns the run id.
    pub async fn trigger(
        &self,
        pipeline_id: &str,
        branch: Option<&str>,
        variables: &std::collections::BTreeMap<String, String>,
    ) -> Result<String> {
        let mut args: Vec<String> = vec!["run".into(), pipeline_id.into(), "--detach".into()];
        if let Some(branch) = branch {
            args.push("--branch".into());
            args.push(branch.into());
        }
        for (key, value) in variables {
            args.push("--variable".into());
            args.push(format!("{key}={value}"));
        }
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.exec(&borrowed).await?;
        extract_pipeline_id(&stdout)
    }

    /// Poll a run until terminal; `Terminated` on poll timeout.
    pub async fn wait_for(&self, run_id: &str) -> Result<PipelineStatus> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let stdout = self
                .exec(&["get", "builds", run_id, "-o", "json"])
                .await?;
            let parsed: serde_json::Value = serde_json::from_str(stdout.trim())
                .map_err(|e| DomainError::Transient(format!("codefresh status decode: {e}")))?;
            let raw_status = parsed
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("running");
            let status = PipelineStatus::from_codefresh(raw_status);
            if status.is_terminal() {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(PipelineStatus::Terminated);
            }
        }
    }

    pub fn build_url(&self, run_id: &str) -> String {
        format!("https://g.codefresh.io/build/{run_id}")
    }
}

fn extract_pipeline_id(stdout: &str) -> Result<String> {
    PIPELINE_ID
        .find(stdout)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            DomainError::Permanent(format!(
                "no pipeline id in runner output: {}",
                stdout.trim()
            ))
        })
}

pub struct CodefreshBuilder {
    cli: CodefreshCli,
    registry_domain: String,
}

impl CodefreshBuilder {
    pub fn new(cli: CodefreshCli, registry_domain: &str) -> Self {
        CodefreshBuilder {
            cli,
            registry_domain: registry_domain.to_string(),
        }
    }

    /// The single-file pipeline spec: `Checkout` then `Build`, plus
    /// `InitContainer` and `PostBuild` stages when requested.
    fn pipeline_spec(&self, request: &ImageBuildRequest) -> serde_json::Value {
        let build_arguments: Vec<String> = request
            .build_args
            .keys()
            .map(|key| format!("{key}=${{{{{key}}}}}"))
            .collect();

        let mut stages = vec!["Checkout", "Build"];
        let mut steps = serde_json::Map::new();
        steps.insert(
            "checkout".to_string(),
            json!({
                "stage": "Checkout",
                "type": "git-clone",
                "repo": request.repository_full_name,
                "revision": request.sha,
            }),
        );
        steps.insert(
            "build".to_string(),
            json!({
                "stage": "Build",
                "type": "build",
                "working_directory": "${{checkout}}",
                "image_name": request.image_repo,
                "tag": request.tag,
                "dockerfile": request.dockerfile_path,
                "registry": self.registry_domain,
                "build_arguments": build_arguments,
            }),
        );
        if request.init_container {
            stages.push("InitContainer");
            steps.insert(
                "init_container".to_string(),
                json!({
                    "stage": "InitContainer",
                    "type": "build",
                    "working_directory": "${{checkout}}",
                    "image_name": request.image_repo,
                    "tag": format!("{}-init", request.tag),
                    "dockerfile": request.dockerfile_path,
                    "registry": self.registry_domain,
                }),
            );
        }
        if let Some(post_build) = &request.post_build_pipeline_id {
            stages.push("PostBuild");
            steps.insert(
                "post_build".to_string(),
                json!({
                    "stage": "PostBuild",
                    "type": "codefresh-run",
                    "arguments": { "PIPELINE_ID": post_build, "DETACH": true },
                }),
            );
        }

        json!({
            "version": "1.0",
            "metadata": {
                "annotations": {
                    "uuid": request.build_uuid,
                    "deployUUID": request.deploy_uuid,
                    "branch": request.branch,
                    "repo": request.repository_full_name,
                    "author": request.author.clone().unwrap_or_default(),
                }
            },
            "stages": stages,
            "steps": steps,
        })
    }
}

#[async_trait]
impl ImageBuilder for CodefreshBuilder {
    async fn build_image(&self, request: &ImageBuildRequest) -> Result<ImageBuildOutcome> {
        let spec = self.pipeline_spec(request);
        let yaml = serde_yaml::to_string(&spec)
            .map_err(|e| DomainError::Internal(format!("pipeline spec encode: {e}")))?;

        let spec_path =
            std::env::temp_dir().join(format!("pipeline-{}.yaml", request.deploy_uuid));
        tokio::fs::write(&spec_path, yaml)
            .await
            .map_err(|e| DomainError::Transient(format!("pipeline spec write: {e}")))?;

        let run_id = self.cli.run_spec(&spec_path).await?;
        info!(pipeline = %run_id, deploy = %request.deploy_uuid, "external build started");

        let status = self.cli.wait_for(&run_id).await?;
        tokio::fs::remove_file(&spec_path).await.ok();

        match status {
            PipelineStatus::Success => Ok(ImageBuildOutcome {
                image_ref: format!(
                    "{}/{}:{}",
                    self.registry_domain, request.image_repo, request.tag
                ),
                logs: self.cli.build_url(&run_id),
                pipeline_id: Some(run_id),
            }),
            PipelineStatus::Error => Err(DomainError::Permanent(format!(
                "external build {run_id} failed"
            ))),
            PipelineStatus::Terminated => Err(DomainError::Permanent(format!(
                "external build {run_id} terminated"
            ))),
            PipelineStatus::Running => unreachable!("wait_for returns terminal statuses"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn pipeline_id_extraction_finds_24_hex() {
        let id = extract_pipeline_id("run started: 5f2a9c0de1b2c3d4e5f60718\n").unwrap();
        assert_eq!(id, "5f2a9c0de1b2c3d4e5f60718");
        assert!(extract_pipeline_id("no id here").is_err());
        // Too short must not match.
        assert!(extract_pipeline_id("abc123").is_err());
    }

    #[test]
    fn spec_carries_stages_annotations_and_placeholder_args() {
        let builder = CodefreshBuilder::new(CodefreshCli::default(), "registry.example.com");
        let request = ImageBuildRequest {
            deploy_uuid: "api-tidy-otter-4f2a".to_string(),
            build_uuid: "tidy-otter-4f2a".to_string(),
            service_name: "api".to_string(),
            repository_full_name: "org/api".to_string(),
            installation_id: 42,
            branch: "main".to_string(),
            sha: "abc123".to_string(),
            dockerfile_path: "Dockerfile".to_string(),
            init_container: true,
            build_args: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            image_repo: "lifecycle/api".to_string(),
            tag: "abc123-deadbeef0123".to_string(),
            namespace: "env-tidy-otter-4f2a".to_string(),
            author: Some("octocat".to_string()),
            post_build_pipeline_id: None,
        };
        let spec = builder.pipeline_spec(&request);

        assert_eq!(
            spec["metadata"]["annotations"]["deployUUID"],
            "api-tidy-otter-4f2a"
        );
        let stages: Vec<&str> = spec["stages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s.as_str())
            .collect();
        assert_eq!(stages, vec!["Checkout", "Build", "InitContainer"]);
        assert_eq!(
            spec["steps"]["build"]["build_arguments"][0],
            "NODE_ENV=${{NODE_ENV}}"
        );
    }
}
