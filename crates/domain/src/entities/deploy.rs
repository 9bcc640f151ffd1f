use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::status::DeployStatus;

/// Per-service runtime state within a build. `uuid` is
/// `<deployable.name>-<build.uuid>` and globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deploy {
    pub id: Uuid,
    pub uuid: String,
    pub build_id: Uuid,
    pub deployable_id: Uuid,
    pub service_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: DeployStatus,
    pub status_message: Option<String>,
    pub active: bool,
    pub docker_image: Option<String>,
    pub init_docker_image: Option<String>,
    pub public_url: Option<String>,
    pub internal_hostname: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<i32>,
    pub branch_name: Option<String>,
    pub tag: Option<String>,
    pub sha: Option<String>,
    pub replica_count: Option<i32>,
    pub env: Json<BTreeMap<String, String>>,
    pub init_env: Json<BTreeMap<String, String>>,
    pub build_logs: Option<String>,
    pub container_logs: Option<String>,
    pub run_uuid: Option<Uuid>,
    pub yaml_config: Option<String>,
    pub is_running_latest: bool,
    pub running_image: Option<String>,
    pub deploy_pipeline_id: Option<String>,
    pub build_output: Option<String>,
    pub build_job_name: Option<String>,
    pub github_deployment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deploy {
    /// Helm release names are the deploy uuid lower-cased.
    pub fn release_name(&self) -> String {
        self.uuid.to_lowercase()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployPatch {
    pub status: Option<DeployStatus>,
    pub status_message: Option<Option<String>>,
    pub active: Option<bool>,
    pub docker_image: Option<Option<String>>,
    pub init_docker_image: Option<Option<String>>,
    pub public_url: Option<Option<String>>,
    pub internal_hostname: Option<Option<String>>,
    pub ip_address: Option<Option<String>>,
    pub port: Option<Option<i32>>,
    pub branch_name: Option<Option<String>>,
    pub tag: Option<Option<String>>,
    pub sha: Option<Option<String>>,
    pub replica_count: Option<Option<i32>>,
    pub env: Option<BTreeMap<String, String>>,
    pub init_env: Option<BTreeMap<String, String>>,
    pub build_logs: Option<Option<String>>,
    pub container_logs: Option<Option<String>>,
    pub run_uuid: Option<Uuid>,
    pub yaml_config: Option<Option<String>>,
    pub is_running_latest: Option<bool>,
    pub running_image: Option<Option<String>>,
    pub deploy_pipeline_id: Option<Option<String>>,
    pub build_output: Option<Option<String>>,
    pub build_job_name: Option<Option<String>>,
    pub github_deployment_id: Option<Option<i64>>,
}

impl DeployPatch {
    pub fn status(status: DeployStatus) -> Self {
        DeployPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn status_with_message(status: DeployStatus, message: impl Into<String>) -> Self {
        DeployPatch {
            status: Some(status),
            status_message: Some(Some(message.into())),
            ..Default::default()
        }
    }
}

/// One row of the aggregated deploy summary view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeploySummaryRow {
    pub uuid: String,
    pub service_name: String,
    pub deploy_type: String,
    pub status: String,
    pub status_message: Option<String>,
    pub active: bool,
    pub docker_image: Option<String>,
    pub internal_hostname: Option<String>,
    pub public_url: Option<String>,
    pub branch_name: Option<String>,
    pub sha: Option<String>,
    pub updated_at: DateTime<Utc>,
}
