use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::status::DeployType;

/// Helm chart coordinates plus the ordered value overrides. `values` and
/// `value_files` keep YAML declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub name: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub value_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSpec {
    pub chart: ChartSpec,
    #[serde(default, rename = "type")]
    pub helm_type: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub disable_ingress_host: bool,
    #[serde(default)]
    pub override_default_ip_whitelist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerSpec {
    #[serde(default = "DockerSpec::default_dockerfile_path")]
    pub dockerfile_path: String,
    #[serde(default)]
    pub init_dockerfile_path: Option<String>,
    #[serde(default)]
    pub after_build_pipeline_id: Option<String>,
    #[serde(default)]
    pub detach_after_build_pipeline: bool,
    #[serde(default)]
    pub ecr: Option<String>,
}

impl DockerSpec {
    fn default_dockerfile_path() -> String {
        "Dockerfile".to_string()
    }
}

impl Default for DockerSpec {
    fn default() -> Self {
        DockerSpec {
            dockerfile_path: Self::default_dockerfile_path(),
            init_dockerfile_path: None,
            after_build_pipeline_id: None,
            detach_after_build_pipeline: false,
            ecr: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    #[serde(default)]
    pub readiness: Option<serde_json::Value>,
    #[serde(default)]
    pub network: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KedaScaleToZero {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodefreshSpec {
    pub pipeline_id: String,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    #[serde(default)]
    pub snapshot_identifier: Option<String>,
    #[serde(default)]
    pub instance_class: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Named { port: u16 },
}

impl PortSpec {
    pub fn port(&self) -> u16 {
        match self {
            PortSpec::Number(p) => *p,
            PortSpec::Named { port } => *port,
        }
    }
}

/// Per-service spec materialised from the YAML for one build.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployable {
    pub id: Uuid,
    pub build_id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub deploy_type: DeployType,
    pub branch_name: Option<String>,
    pub env: Json<BTreeMap<String, String>>,
    pub init_env: Json<BTreeMap<String, String>>,
    pub ports: Json<Vec<PortSpec>>,
    pub public: bool,
    pub grpc: bool,
    pub capacity_type: Option<String>,
    pub helm: Option<Json<HelmSpec>>,
    pub docker: Option<Json<DockerSpec>>,
    pub codefresh: Option<Json<CodefreshSpec>>,
    pub restore: Option<Json<RestoreSpec>>,
    pub deployment: Option<Json<DeploymentSpec>>,
    pub keda_scale_to_zero: Option<Json<KedaScaleToZero>>,
    pub deployment_depends_on: Json<Vec<String>>,
    pub build_uuid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployable {
    /// Deploy identity convention; shows up in DNS names and Helm release
    /// names, so it must stay DNS-safe.
    pub fn deploy_uuid(&self) -> String {
        format!("{}-{}", self.name, self.build_uuid)
    }

    pub fn first_port(&self) -> Option<u16> {
        self.ports.0.first().map(PortSpec::port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployablePatch {
    pub branch_name: Option<Option<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub init_env: Option<BTreeMap<String, String>>,
    pub ports: Option<Vec<PortSpec>>,
    pub public: Option<bool>,
    pub grpc: Option<bool>,
    pub capacity_type: Option<Option<String>>,
    pub helm: Option<Option<HelmSpec>>,
    pub docker: Option<Option<DockerSpec>>,
    pub deployment: Option<Option<DeploymentSpec>>,
    pub keda_scale_to_zero: Option<Option<KedaScaleToZero>>,
    pub deployment_depends_on: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_uuid_joins_name_and_build_uuid() {
        let deployable = Deployable {
            id: Uuid::nil(),
            build_id: Uuid::nil(),
            name: "api".to_string(),
            deploy_type: DeployType::Github,
            branch_name: None,
            env: Json(BTreeMap::new()),
            init_env: Json(BTreeMap::new()),
            ports: Json(vec![PortSpec::Number(8080)]),
            public: true,
            grpc: false,
            capacity_type: None,
            helm: None,
            docker: None,
            codefresh: None,
            restore: None,
            deployment: None,
            keda_scale_to_zero: None,
            deployment_depends_on: Json(vec![]),
            build_uuid: "tidy-otter-4f2".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(deployable.deploy_uuid(), "api-tidy-otter-4f2");
        assert_eq!(deployable.first_port(), Some(8080));
    }

    #[test]
    fn port_spec_accepts_bare_numbers_and_maps() {
        let ports: Vec<PortSpec> = serde_json::from_str(r#"[80, {"port": 9090}]"#).unwrap();
        assert_eq!(ports[0].port(), 80);
        assert_eq!(ports[1].port(), 9090);
    }
}
