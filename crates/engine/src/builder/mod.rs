//! Image building: one contract, two back-ends (in-cluster job vs external
//! CI), plus the fingerprint tag and the registry tag-existence probe that
//! short-circuits rebuilds.

pub mod cluster;
pub mod codefresh;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use domain::{DomainError, Result};

/// Everything a back-end needs to produce one image.
#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    pub deploy_uuid: String,
    pub build_uuid: String,
    pub service_name: String,
    pub repository_full_name: String,
    pub installation_id: i64,
    pub branch: String,
    pub sha: String,
    pub dockerfile_path: String,
    /// Building the init container variant of the same service.
    pub init_container: bool,
    pub build_args: BTreeMap<String, String>,
    pub image_repo: String,
    pub tag: String,
    pub namespace: String,
    pub author: Option<String>,
    /// External pipeline chained after a successful build, when configured.
    pub post_build_pipeline_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageBuildOutcome {
    pub image_ref: String,
    pub logs: String,
    /// External pipeline id when the back-end runs out-of-cluster.
    pub pipeline_id: Option<String>,
}

/// Terminal pipeline states, mapped from back-end specific vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Running,
    Success,
    Error,
    Terminated,
}

impl PipelineStatus {
    pub fn from_codefresh(raw: &str) -> Self {
        match raw {
            "success" => PipelineStatus::Success,
            "error" | "failure" | "denied" => PipelineStatus::Error,
            "terminated" | "terminating" => PipelineStatus::Terminated,
            _ => PipelineStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != PipelineStatus::Running
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image and push it; returns the pushed reference.
    async fn build_image(&self, request: &ImageBuildRequest) -> Result<ImageBuildOutcome>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    /// Whether `tag` already exists in `repo` on the registry at `domain`.
    /// `Ok(false)` means definitively absent; transport trouble is an error
    /// so callers retry instead of rebuilding needlessly.
    async fn tag_exists(&self, domain: &str, repo: &str, tag: &str) -> Result<bool>;
}

/// Fingerprint tag: `<sha>-<12 hex of sha256 over dockerfile path, sorted
/// build args, init flag>`. Identical inputs always map to the same tag,
/// which is what lets the probe skip rebuilds.
pub fn fingerprint_tag(
    sha: &str,
    dockerfile_path: &str,
    build_args: &BTreeMap<String, String>,
    init_container: bool,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dockerfile_path.as_bytes());
    for (key, value) in build_args {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(if init_container { b"init" } else { b"main" });
    let digest = hex::encode(hasher.finalize());
    format!("{sha}-{}", &digest[..12])
}

/// The registry id is the first dot-separated segment of the registry
/// domain (`123456789.dkr.ecr.us-east-1.amazonaws.com` -> `123456789`).
pub fn registry_id(domain: &str) -> Result<&str> {
    domain
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| DomainError::Config(format!("malformed registry domain: {domain}")))
}

/// Tag probe over the registry HTTP API; a HEAD on the manifest is enough
/// to learn existence.
pub struct HttpRegistryProbe {
    http: reqwest::Client,
}

impl HttpRegistryProbe {
    pub fn new() -> Self {
        HttpRegistryProbe {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRegistryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    async fn tag_exists(&self, domain: &str, repo: &str, tag: &str) -> Result<bool> {
        let id = registry_id(domain)?;
        let url = format!("https://{domain}/v2/{repo}/manifests/{tag}");
        let response = self
            .http
            .head(&url)
            .header(
                reqwest::header::ACCEPT,
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .send()
            .await
            .map_err(|e| DomainError::Transient(format!("registry {id} probe: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(DomainError::Transient(format!(
                "registry {id} probe {repo}:{tag}: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint_tag("abc123", "Dockerfile", &args(&[("A", "1")]), false);
        let b = fingerprint_tag("abc123", "Dockerfile", &args(&[("A", "1")]), false);
        assert_eq!(a, b);
        assert!(a.starts_with("abc123-"));
        assert_eq!(a.len(), "abc123-".len() + 12);
    }

    #[test]
    fn fingerprint_varies_with_inputs() {
        let base = fingerprint_tag("abc123", "Dockerfile", &args(&[]), false);
        assert_ne!(
            base,
            fingerprint_tag("abc123", "docker/Dockerfile", &args(&[]), false)
        );
        assert_ne!(
            base,
            fingerprint_tag("abc123", "Dockerfile", &args(&[("A", "1")]), false)
        );
        assert_ne!(base, fingerprint_tag("abc123", "Dockerfile", &args(&[]), true));
    }

    #[test]
    fn registry_id_is_first_domain_segment() {
        assert_eq!(
            registry_id("123456789.dkr.ecr.us-east-1.amazonaws.com").unwrap(),
            "123456789"
        );
        assert!(registry_id("").is_err());
    }

    #[test]
    fn codefresh_status_mapping() {
        assert_eq!(
            PipelineStatus::from_codefresh("success"),
            PipelineStatus::Success
        );
        assert_eq!(
            PipelineStatus::from_codefresh("failure"),
            PipelineStatus::Error
        );
        assert_eq!(
            PipelineStatus::from_codefresh("terminated"),
            PipelineStatus::Terminated
        );
        assert!(!PipelineStatus::from_codefresh("running").is_terminal());
    }
}
