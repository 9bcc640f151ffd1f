use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::DomainError;
use crate::status::WebhookInvocationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookType {
    Codefresh,
    Docker,
    Command,
}

impl WebhookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookType::Codefresh => "codefresh",
            WebhookType::Docker => "docker",
            WebhookType::Command => "command",
        }
    }
}

impl fmt::Display for WebhookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codefresh" => Ok(WebhookType::Codefresh),
            "docker" => Ok(WebhookType::Docker),
            "command" => Ok(WebhookType::Command),
            other => Err(DomainError::Validation(format!(
                "unknown webhook type: {other}"
            ))),
        }
    }
}

/// One configured webhook entry from the build's `webhooks` YAML block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub name: String,
    #[serde(rename = "type")]
    pub webhook_type: WebhookType,
    /// Build status this webhook fires on (`deployed`, `error`, `torn_down`).
    pub state: String,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Webhook {
    /// Mandatory-field validation per type. Codefresh entries historically
    /// only check the pipeline id; the trigger fails fast server-side.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self.webhook_type {
            WebhookType::Codefresh => {
                if self.pipeline_id.as_deref().unwrap_or("").is_empty() {
                    return Err(DomainError::Validation(format!(
                        "webhook {}: codefresh requires pipelineId",
                        self.name
                    )));
                }
            }
            WebhookType::Docker => {
                if self.docker_image.as_deref().unwrap_or("").is_empty() {
                    return Err(DomainError::Validation(format!(
                        "webhook {}: docker requires dockerImage",
                        self.name
                    )));
                }
            }
            WebhookType::Command => {
                if self.script.as_deref().unwrap_or("").is_empty() {
                    return Err(DomainError::Validation(format!(
                        "webhook {}: command requires script",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Record of one webhook execution; exactly one row per configured entry
/// per matching transition per run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookInvocation {
    pub id: Uuid,
    pub build_id: Uuid,
    pub run_uuid: Uuid,
    pub name: String,
    pub webhook_type: String,
    pub state: String,
    pub yaml_config: Option<String>,
    pub metadata: Json<serde_json::Value>,
    #[sqlx(try_from = "String")]
    pub status: WebhookInvocationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_webhook_requires_image() {
        let webhook = Webhook {
            name: "notify".to_string(),
            webhook_type: WebhookType::Docker,
            state: "deployed".to_string(),
            pipeline_id: None,
            trigger: None,
            docker_image: None,
            command: None,
            args: vec![],
            script: None,
            env: BTreeMap::new(),
        };
        assert!(webhook.validate().is_err());
    }

    #[test]
    fn webhook_yaml_round_trip() {
        let yaml = r#"
name: smoke-test
type: command
state: deployed
script: ./scripts/smoke.sh
env:
  TARGET: "{{api_publicUrl}}"
"#;
        let webhook: Webhook = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(webhook.webhook_type, WebhookType::Command);
        assert!(webhook.validate().is_ok());
        assert_eq!(webhook.env["TARGET"], "{{api_publicUrl}}");
    }
}
