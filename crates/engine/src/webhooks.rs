//! Webhook dispatch on terminal build transitions.
//!
//! The build's `webhooks_yaml` (authoritative as of the last resolve) is
//! parsed, entries matching the new state run in order, and each one writes
//! exactly one invocation row per run. The dispatcher is idempotent per
//! `(run, state, name)` so the queue needs no per-build lock.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use domain::entities::{Build, Webhook, WebhookType};
use domain::status::WebhookInvocationStatus;
use domain::{DomainError, Result};
use queue::Job;
use renderer::TemplateRenderer;

use crate::jobs::{ContainerSpec, JobRequest};
use crate::render;
use crate::service::{BuildService, WebhookJobPayload};

const WEBHOOK_JOB_TIMEOUT: Duration = Duration::from_secs(1800);
const COMMAND_IMAGE: &str = "alpine:3.20";

/// Parse the serialised webhook list; an absent document is an empty list.
pub fn parse_webhooks(yaml: Option<&str>) -> Result<Vec<Webhook>> {
    match yaml {
        None => Ok(Vec::new()),
        Some(doc) if doc.trim().is_empty() => Ok(Vec::new()),
        Some(doc) => serde_yaml::from_str(doc)
            .map_err(|e| DomainError::Validation(format!("webhooks yaml: {e}"))),
    }
}

impl BuildService {
    pub(crate) async fn process_webhooks(&self, job: Job) -> Result<()> {
        let payload: WebhookJobPayload = job.data()?;
        let build = store::builds::get_by_id(&self.pool, payload.build_id).await?;

        let webhooks = parse_webhooks(build.webhooks_yaml.as_deref())?;
        let matching: Vec<&Webhook> = webhooks
            .iter()
            .filter(|w| w.state == payload.state)
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        let env_context = self.webhook_render_context(&build).await?;

        for webhook in matching {
            // At-least-once with an idempotency guard: a row for this
            // (run, state, name) means a previous delivery already ran it.
            if store::webhook_invocations::exists(
                &self.pool,
                build.id,
                payload.run_uuid,
                &webhook.name,
                &payload.state,
            )
            .await?
            {
                info!(build = %build.uuid, webhook = %webhook.name, "invocation exists, skipping");
                continue;
            }

            let yaml = serde_yaml::to_string(webhook).ok();
            let invocation = store::webhook_invocations::create(
                &self.pool,
                build.id,
                payload.run_uuid,
                &webhook.name,
                webhook.webhook_type.as_str(),
                &payload.state,
                yaml.as_deref(),
            )
            .await?;

            let result = self
                .dispatch_webhook(&build, webhook, &env_context)
                .await;

            let (status, metadata) = match result {
                Ok(metadata) => (WebhookInvocationStatus::Completed, metadata),
                Err(e) => {
                    warn!(build = %build.uuid, webhook = %webhook.name, "webhook failed: {e}");
                    (
                        WebhookInvocationStatus::Failed,
                        serde_json::json!({ "error": e.status_message() }),
                    )
                }
            };
            store::webhook_invocations::complete(&self.pool, invocation.id, status, metadata)
                .await?;
        }
        Ok(())
    }

    /// Render context plus comment runtime env, shared by all entries.
    async fn webhook_render_context(
        &self,
        build: &Build,
    ) -> Result<(renderer::RenderContext, BTreeMap<String, String>)> {
        let graph = store::builds::load(&self.pool, &build.uuid, "deploys.deployable")
            .await?
            .ok_or_else(|| DomainError::not_found("build", &build.uuid))?;
        let global = self.config.get().await?;
        let context = render::render_context(build, &graph.deploys, &graph.deployables, &global);
        Ok((context, build.comment_runtime_env.0.clone()))
    }

    async fn dispatch_webhook(
        &self,
        build: &Build,
        webhook: &Webhook,
        (context, runtime_env): &(renderer::RenderContext, BTreeMap<String, String>),
    ) -> Result<serde_json::Value> {
        // Validation failures are recorded, not thrown past the row.
        webhook.validate()?;

        let renderer = TemplateRenderer::new(context.clone());
        let mut env = BTreeMap::new();
        for (key, value) in &webhook.env {
            env.insert(key.clone(), renderer.render(value, true)?);
        }
        for (key, value) in runtime_env {
            env.insert(key.clone(), value.clone());
        }

        match webhook.webhook_type {
            WebhookType::Codefresh => {
                let pipeline_id = webhook.pipeline_id.as_deref().unwrap_or_default();
                let run_id = self
                    .codefresh
                    .trigger(pipeline_id, None, &env)
                    .await?;
                Ok(serde_json::json!({
                    "link": self.codefresh.build_url(&run_id),
                    "buildId": run_id,
                }))
            }
            WebhookType::Docker => {
                let image = webhook.docker_image.clone().unwrap_or_default();
                let container = ContainerSpec {
                    name: "webhook".to_string(),
                    image,
                    command: webhook.command.clone().map(|c| vec![c]),
                    args: (!webhook.args.is_empty()).then(|| webhook.args.clone()),
                    env,
                };
                let outcome = self
                    .job_runner
                    .run_job(&webhook_job(build, webhook, container))
                    .await?;
                if !outcome.success {
                    return Err(DomainError::Permanent(format!(
                        "webhook job {} failed",
                        outcome.job_name
                    )));
                }
                Ok(serde_json::json!({
                    "jobName": outcome.job_name,
                    "success": outcome.success,
                }))
            }
            WebhookType::Command => {
                let script = webhook.script.clone().unwrap_or_default();
                let container = ContainerSpec {
                    name: "webhook".to_string(),
                    image: COMMAND_IMAGE.to_string(),
                    command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                    args: Some(vec![script]),
                    env,
                };
                let outcome = self
                    .job_runner
                    .run_job(&webhook_job(build, webhook, container))
                    .await?;
                if !outcome.success {
                    return Err(DomainError::Permanent(format!(
                        "webhook job {} failed",
                        outcome.job_name
                    )));
                }
                Ok(serde_json::json!({
                    "jobName": outcome.job_name,
                    "success": outcome.success,
                }))
            }
        }
    }
}

fn webhook_job(build: &Build, webhook: &Webhook, container: ContainerSpec) -> JobRequest {
    let mut name = format!("wh-{}-{}", webhook.name, build.uuid);
    name.truncate(63);
    JobRequest {
        name: name.trim_end_matches('-').to_string(),
        namespace: build.namespace.clone(),
        labels: std::collections::BTreeMap::from([
            ("lc-build-id".to_string(), build.uuid.clone()),
            ("lc-webhook".to_string(), webhook.name.clone()),
        ]),
        init_containers: vec![],
        containers: vec![container],
        ttl_seconds: build.is_static.then_some(crate::helm::STATIC_JOB_TTL_SECS as i64),
        static_node_pool: build.is_static,
        timeout: WEBHOOK_JOB_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_webhooks_handles_absent_and_present_docs() {
        assert!(parse_webhooks(None).unwrap().is_empty());
        assert!(parse_webhooks(Some("  ")).unwrap().is_empty());

        let yaml = r#"
- name: notify
  type: codefresh
  state: deployed
  pipelineId: 5f2a9c0de1b2c3d4e5f60718
- name: cleanup
  type: command
  state: torn_down
  script: ./cleanup.sh
"#;
        let webhooks = parse_webhooks(Some(yaml)).unwrap();
        assert_eq!(webhooks.len(), 2);
        assert_eq!(webhooks[0].webhook_type, WebhookType::Codefresh);
        assert_eq!(webhooks[1].state, "torn_down");
    }

    #[test]
    fn webhook_lists_filter_by_state() {
        let yaml = r#"
- name: a
  type: command
  state: deployed
  script: ./a.sh
- name: b
  type: command
  state: error
  script: ./b.sh
"#;
        let webhooks = parse_webhooks(Some(yaml)).unwrap();
        let deployed: Vec<_> = webhooks.iter().filter(|w| w.state == "deployed").collect();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].name, "a");
    }
}
