//! Versioned schema registry for the service spec YAML.
//!
//! Each supported version maps to its own strongly typed parser; unknown
//! properties are rejected at the serde layer, so "validates against the
//! schema" and "parses" are the same property.

mod v1;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use domain::entities::{
    CodefreshSpec, DeploymentSpec, DockerSpec, HelmSpec, KedaScaleToZero, PortSpec, RestoreSpec,
    Webhook,
};
use domain::status::DeployType;
use domain::{DomainError, Result};

type VersionParser = fn(&str) -> Result<ServiceSpecFile>;

/// `version` string -> parser. Additions register here.
const REGISTRY: &[(&str, VersionParser)] = &[("1.0.0", v1::parse)];

pub fn supported_versions() -> Vec<&'static str> {
    REGISTRY.iter().map(|(version, _)| *version).collect()
}

/// Parse and validate a raw YAML document against the registered schema for
/// its declared version.
pub fn parse(yaml: &str) -> Result<ServiceSpecFile> {
    if yaml.trim().is_empty() {
        return Err(DomainError::Config("empty YAML config".to_string()));
    }

    #[derive(Deserialize)]
    struct VersionProbe {
        version: Option<String>,
    }

    let probe: VersionProbe = serde_yaml::from_str(yaml)
        .map_err(|e| DomainError::Config(format!("YAML parse failure: {e}")))?;
    let version = probe
        .version
        .ok_or_else(|| DomainError::Config("missing schema version".to_string()))?;

    let parser = REGISTRY
        .iter()
        .find(|(candidate, _)| *candidate == version)
        .map(|(_, parser)| parser)
        .ok_or_else(|| {
            DomainError::Validation(format!(
                "unsupported schema version {version}; supported: {}",
                supported_versions().join(", ")
            ))
        })?;

    parser(yaml)
}

/// Canonical (version-independent) parse result.
#[derive(Debug, Clone)]
pub struct ServiceSpecFile {
    pub version: String,
    pub services: Vec<ServiceSpec>,
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubSpec {
    pub repository: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub docker: Option<DockerSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageSpec {
    pub docker_image: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub ecr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalHttpSpec {
    pub url: String,
}

/// One service entry after type detection; exactly one of the type-specific
/// bodies is populated, matching `deploy_type`.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub deploy_type: DeployType,
    pub optional: bool,

    pub github: Option<GithubSpec>,
    pub docker_image: Option<DockerImageSpec>,
    pub codefresh: Option<CodefreshSpec>,
    pub external_http: Option<ExternalHttpSpec>,
    pub restore: Option<RestoreSpec>,
    pub helm: Option<HelmSpec>,
    /// Docker build settings (github- and docker-type services).
    pub docker_build: Option<DockerSpec>,

    pub env: BTreeMap<String, String>,
    pub init_env: BTreeMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub public: bool,
    pub grpc: bool,
    pub capacity_type: Option<String>,
    pub deployment: Option<DeploymentSpec>,
    pub keda_scale_to_zero: Option<KedaScaleToZero>,
    pub deployment_depends_on: Vec<String>,
    pub branch_name: Option<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, deploy_type: DeployType) -> Self {
        ServiceSpec {
            name: name.into(),
            deploy_type,
            optional: false,
            github: None,
            docker_image: None,
            codefresh: None,
            external_http: None,
            restore: None,
            helm: None,
            docker_build: None,
            env: BTreeMap::new(),
            init_env: BTreeMap::new(),
            ports: Vec::new(),
            public: false,
            grpc: false,
            capacity_type: None,
            deployment: None,
            keda_scale_to_zero: None,
            deployment_depends_on: Vec::new(),
            branch_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_a_config_error() {
        assert!(matches!(parse("   \n"), Err(DomainError::Config(_))));
    }

    #[test]
    fn missing_version_is_a_config_error() {
        let err = parse("services: []").unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");
    }

    #[test]
    fn unsupported_version_lists_supported_ones() {
        let err = parse("version: 9.9.9\nservices: []").unwrap_err();
        assert!(err.to_string().contains("1.0.0"), "{err}");
    }
}
