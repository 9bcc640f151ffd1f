use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One key/value row of the process-wide configuration table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GlobalConfigEntry {
    pub id: Uuid,
    pub key: String,
    pub config: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Domain suffixes used for public hostnames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDefaults {
    pub http: String,
    #[serde(default)]
    pub grpc: Option<String>,
}

/// Materialised view over the `global_config` rows the engine cares about.
/// Chart defaults live under their chart name key and stay untyped JSON
/// until merged into a deployable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub default_uuid: String,
    pub default_namespace: String,
    pub domain_defaults: DomainDefaults,
    pub deploy_cluster: String,
    pub image_registry: String,
    pub org_chart_name: String,
    pub allow_lists: BTreeMap<String, Vec<String>>,
    pub lifecycle_defaults: serde_json::Value,
    pub chart_defaults: BTreeMap<String, serde_json::Value>,
}

impl GlobalConfig {
    pub const DEFAULT_UUID_KEY: &'static str = "defaultUUID";
    pub const DEFAULT_NAMESPACE_KEY: &'static str = "defaultNamespace";
    pub const DOMAIN_DEFAULTS_KEY: &'static str = "domainDefaults";
    pub const DEPLOY_CLUSTER_KEY: &'static str = "deployCluster";
    pub const IMAGE_REGISTRY_KEY: &'static str = "imageRegistry";
    pub const ORG_CHART_NAME_KEY: &'static str = "orgChartName";
    pub const ALLOW_LISTS_KEY: &'static str = "allowLists";
    pub const LIFECYCLE_DEFAULTS_KEY: &'static str = "lifecycleDefaults";

    /// Assemble from raw rows; unrecognised keys are chart defaults.
    pub fn from_entries(entries: &[GlobalConfigEntry]) -> Self {
        let mut config = GlobalConfig::default();
        for entry in entries {
            let value = &entry.config.0;
            match entry.key.as_str() {
                Self::DEFAULT_UUID_KEY => {
                    config.default_uuid = value.as_str().unwrap_or_default().to_string();
                }
                Self::DEFAULT_NAMESPACE_KEY => {
                    config.default_namespace = value.as_str().unwrap_or_default().to_string();
                }
                Self::DOMAIN_DEFAULTS_KEY => {
                    config.domain_defaults =
                        serde_json::from_value(value.clone()).unwrap_or_default();
                }
                Self::DEPLOY_CLUSTER_KEY => {
                    config.deploy_cluster = value.as_str().unwrap_or_default().to_string();
                }
                Self::IMAGE_REGISTRY_KEY => {
                    config.image_registry = value.as_str().unwrap_or_default().to_string();
                }
                Self::ORG_CHART_NAME_KEY => {
                    config.org_chart_name = value.as_str().unwrap_or_default().to_string();
                }
                Self::ALLOW_LISTS_KEY => {
                    config.allow_lists = serde_json::from_value(value.clone()).unwrap_or_default();
                }
                Self::LIFECYCLE_DEFAULTS_KEY => {
                    config.lifecycle_defaults = value.clone();
                }
                other => {
                    config
                        .chart_defaults
                        .insert(other.to_string(), value.clone());
                }
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, config: serde_json::Value) -> GlobalConfigEntry {
        GlobalConfigEntry {
            id: Uuid::new_v4(),
            key: key.to_string(),
            config: Json(config),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn assembles_known_keys_and_chart_defaults() {
        let config = GlobalConfig::from_entries(&[
            entry("defaultUUID", json!("dev-0")),
            entry("domainDefaults", json!({"http": "lifecycle.example.com"})),
            entry("org-web", json!({"replicaCount": 1})),
        ]);
        assert_eq!(config.default_uuid, "dev-0");
        assert_eq!(config.domain_defaults.http, "lifecycle.example.com");
        assert_eq!(config.chart_defaults["org-web"], json!({"replicaCount": 1}));
    }
}
