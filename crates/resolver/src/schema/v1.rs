//! Schema version 1.0.0.
//!
//! Unknown properties are rejected everywhere (`deny_unknown_fields`); a
//! service entry must carry exactly one of the deploy-type keys.

use serde::Deserialize;
use std::collections::BTreeMap;

use domain::entities::{
    CodefreshSpec, DeploymentSpec, DockerSpec, HelmSpec, KedaScaleToZero, PortSpec, RestoreSpec,
    Webhook,
};
use domain::status::DeployType;
use domain::{DomainError, Result};

use super::{DockerImageSpec, ExternalHttpSpec, GithubSpec, ServiceSpec, ServiceSpecFile};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FileV1 {
    #[allow(dead_code)]
    version: String,
    services: Vec<ServiceV1>,
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ServiceV1 {
    name: String,
    #[serde(default)]
    optional: bool,

    // Deploy-type keys; exactly one must be present.
    #[serde(default)]
    github: Option<GithubSpec>,
    #[serde(default)]
    docker: Option<DockerImageSpec>,
    #[serde(default)]
    codefresh: Option<CodefreshSpec>,
    #[serde(default)]
    external_http: Option<ExternalHttpSpec>,
    #[serde(default)]
    aurora_restore: Option<RestoreSpec>,
    #[serde(default)]
    rds_restore: Option<RestoreSpec>,
    #[serde(default)]
    configuration: Option<ConfigurationV1>,
    #[serde(default)]
    helm: Option<HelmSpec>,

    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    init_env: BTreeMap<String, String>,
    #[serde(default)]
    ports: Vec<PortSpec>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    grpc: bool,
    #[serde(default)]
    capacity_type: Option<String>,
    #[serde(default)]
    deployment: Option<DeploymentSpec>,
    #[serde(default)]
    keda_scale_to_zero: Option<KedaScaleToZero>,
    #[serde(default)]
    deployment_depends_on: Vec<String>,
    #[serde(default)]
    branch_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ConfigurationV1 {
    #[serde(default)]
    env: BTreeMap<String, String>,
}

pub(super) fn parse(yaml: &str) -> Result<ServiceSpecFile> {
    let file: FileV1 = serde_yaml::from_str(yaml)
        .map_err(|e| DomainError::Validation(format!("schema 1.0.0: {e}")))?;

    if file.services.is_empty() {
        return Err(DomainError::Validation(
            "schema 1.0.0: services must not be empty".to_string(),
        ));
    }

    let mut seen = std::collections::BTreeSet::new();
    let services = file
        .services
        .into_iter()
        .map(|service| {
            if !seen.insert(service.name.clone()) {
                return Err(DomainError::Validation(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
            convert(service)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ServiceSpecFile {
        version: "1.0.0".to_string(),
        services,
        webhooks: file.webhooks,
    })
}

fn convert(raw: ServiceV1) -> Result<ServiceSpec> {
    let mut present: Vec<DeployType> = Vec::new();
    if raw.github.is_some() {
        present.push(DeployType::Github);
    }
    if raw.docker.is_some() {
        present.push(DeployType::Docker);
    }
    if raw.codefresh.is_some() {
        present.push(DeployType::Codefresh);
    }
    if raw.external_http.is_some() {
        present.push(DeployType::ExternalHttp);
    }
    if raw.aurora_restore.is_some() {
        present.push(DeployType::AuroraRestore);
    }
    if raw.rds_restore.is_some() {
        present.push(DeployType::RdsRestore);
    }
    if raw.configuration.is_some() {
        present.push(DeployType::Configuration);
    }
    if raw.helm.is_some() {
        present.push(DeployType::Helm);
    }

    let deploy_type = match present.as_slice() {
        [single] => *single,
        [] => {
            return Err(DomainError::Validation(format!(
                "service {}: no deploy type key present",
                raw.name
            )))
        }
        many => {
            return Err(DomainError::Validation(format!(
                "service {}: multiple deploy type keys present: {}",
                raw.name,
                many.iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    };

    let mut spec = ServiceSpec::new(raw.name, deploy_type);
    spec.optional = raw.optional;
    spec.docker_build = raw.github.as_ref().and_then(|g| g.docker.clone());
    spec.branch_name = raw
        .branch_name
        .or_else(|| raw.github.as_ref().and_then(|g| g.branch_name.clone()))
        .or_else(|| raw.codefresh.as_ref().and_then(|c| c.branch_name.clone()));
    spec.github = raw.github;
    spec.docker_image = raw.docker;
    spec.codefresh = raw.codefresh;
    spec.external_http = raw.external_http;
    spec.restore = raw.aurora_restore.or(raw.rds_restore);
    spec.helm = raw.helm;
    spec.env = raw.env;
    spec.init_env = raw.init_env;
    if let Some(configuration) = raw.configuration {
        // Configuration services contribute env only.
        spec.env.extend(configuration.env);
    }
    spec.ports = raw.ports;
    spec.public = raw.public;
    spec.grpc = raw.grpc;
    spec.capacity_type = raw.capacity_type;
    spec.deployment = raw.deployment;
    spec.keda_scale_to_zero = raw.keda_scale_to_zero;
    spec.deployment_depends_on = raw.deployment_depends_on;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::super::parse as parse_any;
    use super::*;

    #[test]
    fn parses_a_full_service_entry() {
        let yaml = r#"
version: 1.0.0
services:
  - name: api
    github:
      repository: org/api
      branchName: main
      docker:
        dockerfilePath: docker/Dockerfile
    env:
      REDIS_URL: "redis://{{cache_internalHostname}}:6379"
    ports: [8080]
    public: true
    deploymentDependsOn: [cache]
  - name: cache
    helm:
      chart:
        name: redis
        repoUrl: https://charts.example.com
        values:
          - architecture=standalone
"#;
        let file = parse_any(yaml).unwrap();
        assert_eq!(file.services.len(), 2);
        let api = &file.services[0];
        assert_eq!(api.deploy_type, DeployType::Github);
        assert_eq!(api.branch_name.as_deref(), Some("main"));
        assert_eq!(
            api.docker_build.as_ref().unwrap().dockerfile_path,
            "docker/Dockerfile"
        );
        assert!(api.public);
        let cache = &file.services[1];
        assert_eq!(cache.deploy_type, DeployType::Helm);
        assert_eq!(
            cache.helm.as_ref().unwrap().chart.values,
            vec!["architecture=standalone"]
        );
    }

    #[test]
    fn rejects_unknown_properties() {
        let yaml = r#"
version: 1.0.0
services:
  - name: api
    github:
      repository: org/api
    definitelyNotAField: true
"#;
        let err = parse_any(yaml).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "{err}");
    }

    #[test]
    fn rejects_zero_deploy_type_keys() {
        let yaml = r#"
version: 1.0.0
services:
  - name: api
    public: true
"#;
        let err = parse_any(yaml).unwrap_err();
        assert!(err.to_string().contains("no deploy type key"), "{err}");
    }

    #[test]
    fn rejects_multiple_deploy_type_keys() {
        let yaml = r#"
version: 1.0.0
services:
  - name: api
    github:
      repository: org/api
    helm:
      chart:
        name: api
"#;
        let err = parse_any(yaml).unwrap_err();
        assert!(err.to_string().contains("multiple deploy type"), "{err}");
    }

    #[test]
    fn rejects_duplicate_service_names() {
        let yaml = r#"
version: 1.0.0
services:
  - name: api
    github:
      repository: org/api
  - name: api
    docker:
      dockerImage: org/api:latest
"#;
        let err = parse_any(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate service name"), "{err}");
    }
}
