use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::status::BuildStatus;

/// Feature flag: skip the default-UUID fallback during env resolution.
pub const NO_DEFAULT_ENV_RESOLVE: &str = "NO_DEFAULT_ENV_RESOLVE";

/// One run of the pipeline for one PR revision. Owns its deployables and
/// deploys; `uuid` is the short kebab identifier that namespaces and DNS
/// names derive from.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Build {
    pub id: Uuid,
    pub uuid: String,
    pub pull_request_id: Uuid,
    pub environment_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: BuildStatus,
    pub status_message: Option<String>,
    pub sha: Option<String>,
    pub namespace: String,
    pub enable_full_yaml: bool,
    pub is_static: bool,
    pub webhooks_yaml: Option<String>,
    pub dependency_graph: Option<Json<serde_json::Value>>,
    pub dashboard_links: Json<Vec<String>>,
    pub manifest: Option<String>,
    pub run_uuid: Option<Uuid>,
    pub comment_runtime_env: Json<BTreeMap<String, String>>,
    pub enabled_features: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.enabled_features.0.iter().any(|f| f == feature)
    }

    /// Namespace convention: `env-<uuid>`.
    pub fn namespace_for(uuid: &str) -> String {
        format!("env-{uuid}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildPatch {
    pub status: Option<BuildStatus>,
    pub status_message: Option<Option<String>>,
    pub sha: Option<String>,
    pub webhooks_yaml: Option<Option<String>>,
    pub dependency_graph: Option<serde_json::Value>,
    pub dashboard_links: Option<Vec<String>>,
    pub manifest: Option<Option<String>>,
    pub run_uuid: Option<Uuid>,
    pub comment_runtime_env: Option<BTreeMap<String, String>>,
    pub enabled_features: Option<Vec<String>>,
    pub environment_id: Option<Uuid>,
    pub is_static: Option<bool>,
}

impl BuildPatch {
    pub fn status(status: BuildStatus) -> Self {
        BuildPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn status_with_message(status: BuildStatus, message: impl Into<String>) -> Self {
        BuildPatch {
            status: Some(status),
            status_message: Some(Some(message.into())),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_follows_env_prefix_convention() {
        assert_eq!(Build::namespace_for("tidy-otter-4f2"), "env-tidy-otter-4f2");
    }
}
