//! The resolve worker: YAML -> deployables -> deploys -> rendered env ->
//! per-deploy fan-out. Runs under the build's resolve lock; a superseded
//! run token aborts without side effects.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use domain::entities::build::NO_DEFAULT_ENV_RESOLVE;
use domain::entities::BuildPatch;
use domain::status::{BuildStatus, DeployStatus, DeployType};
use domain::{DomainError, Result};
use queue::lock::keys;
use queue::manager::names as queue_names;
use queue::Job;
use resolver::ResolvedService;
use store::deployables::NewDeployable;

use crate::render;
use crate::service::{BuildService, ResolvePayload};

const LOCK_TTL: Duration = Duration::from_secs(900);
const LOCK_BUSY_RETRY: Duration = Duration::from_secs(5);

impl BuildService {
    pub(crate) async fn process_resolve(&self, job: Job) -> Result<()> {
        let payload: ResolvePayload = job.data()?;

        let Some(guard) = self
            .locks
            .try_acquire(&keys::build_resolve(payload.build_id), LOCK_TTL)
            .await?
        else {
            // Another resolve holds the build; try again shortly. The run
            // token decides who wins.
            self.queues
                .enqueue_delayed(
                    queue_names::RESOLVE,
                    serde_json::to_value(&payload).unwrap_or_default(),
                    LOCK_BUSY_RETRY,
                )
                .await?;
            return Ok(());
        };

        let outcome = self.resolve_build(&payload).await;
        guard.release().await.ok();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if is_config_failure(&e) => {
                warn!(build = %payload.build_id, "resolve config failure: {e}");
                self.transition_build(
                    payload.build_id,
                    BuildStatus::ConfigError,
                    Some(e.status_message()),
                )
                .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_build(&self, payload: &ResolvePayload) -> Result<()> {
        let build = store::builds::get_by_id(&self.pool, payload.build_id).await?;
        if Self::run_superseded(&build, payload.run_uuid) {
            info!(build = %build.uuid, "resolve superseded, exiting");
            return Ok(());
        }

        let pull_request =
            store::pull_requests::get_by_id(&self.pool, build.pull_request_id).await?;
        let repository =
            store::repositories::get_by_id(&self.pool, pull_request.repository_id).await?;

        let sha = build
            .sha
            .clone()
            .or_else(|| pull_request.latest_commit.clone())
            .ok_or_else(|| DomainError::Config("build has no commit sha".to_string()))?;

        let yaml = self
            .forge
            .get_yaml_file_content(&repository, &sha)
            .await?
            .ok_or_else(|| DomainError::Config("lifecycle config missing at ref".to_string()))?;

        let global = self.config.get().await?;

        // The user-edited selection block lives in the status comment.
        let comment_state = match pull_request.status_comment_id {
            Some(comment_id) => match self.forge.get_comment(&repository, comment_id).await {
                Ok(comment) => Some(resolver::comment::parse(&comment.body)),
                Err(DomainError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let resolved = resolver::resolve(&yaml, &global, comment_state.as_ref())?;

        // Comment runtime env and the webhook list are authoritative as of
        // this resolve.
        let webhooks_yaml = if resolved.webhooks.is_empty() {
            None
        } else {
            Some(
                serde_yaml::to_string(&resolved.webhooks)
                    .map_err(|e| DomainError::Internal(format!("webhooks encode: {e}")))?,
            )
        };
        let runtime_env: BTreeMap<String, String> = comment_state
            .as_ref()
            .map(|c| c.runtime_env.clone())
            .unwrap_or_default();

        let graph_json = serde_json::json!({
            "nodes": resolved.graph.nodes(),
            "edges": resolved.graph.edges(),
            "dot": resolved.graph.to_dot(),
        });

        let mut patch = BuildPatch::default();
        patch.webhooks_yaml = Some(webhooks_yaml);
        patch.dependency_graph = Some(graph_json);
        patch.comment_runtime_env = Some(runtime_env.clone());
        let build = store::builds::patch(&self.pool, build.id, patch).await?;

        // Persist the graph: one deployable and one deploy per service, in
        // topological order so sibling lookups during render see peers.
        let mut persisted = Vec::with_capacity(resolved.services.len());
        for service in &resolved.services {
            let deployable = store::deployables::upsert(
                &self.pool,
                &new_deployable(&build, service),
            )
            .await?;
            let branch = service
                .spec
                .branch_name
                .clone()
                .unwrap_or_else(|| pull_request.branch_name.clone());
            let deploy = store::deploys::upsert(
                &self.pool,
                &deployable.deploy_uuid(),
                build.id,
                deployable.id,
                service.selected,
                Some(&branch),
                Some(&sha),
                payload.run_uuid,
            )
            .await?;
            // A vanity URL from the comment overrides the derived one.
            let deploy = match &service.vanity_url {
                Some(url) => {
                    let mut patch = domain::entities::DeployPatch::default();
                    patch.public_url = Some(Some(url.clone()));
                    store::deploys::patch(&self.pool, deploy.id, patch).await?
                }
                None => deploy,
            };
            persisted.push((deployable, deploy, service.clone()));
        }
        let keep: Vec<String> = persisted.iter().map(|(d, _, _)| d.name.clone()).collect();
        store::deployables::delete_absent(&self.pool, build.id, &keep).await?;

        // Render env for every deploy now that all siblings exist.
        let use_default_uuid = !build.has_feature(NO_DEFAULT_ENV_RESOLVE);
        let deploys: Vec<_> = persisted.iter().map(|(_, d, _)| d.clone()).collect();
        let deployables: Vec<_> = persisted.iter().map(|(d, _, _)| d.clone()).collect();
        let context = render::render_context(&build, &deploys, &deployables, &global);
        for (deployable, deploy, _) in &persisted {
            let (env, init_env) =
                render::render_deploy_env(&context, deployable, &runtime_env, use_default_uuid)?;
            store::deploys::replace_env(&self.pool, deploy.id, &env, &init_env).await?;
        }

        // Re-check supersedence before the final write-back.
        let build = store::builds::reload(&self.pool, &build).await?;
        if Self::run_superseded(&build, payload.run_uuid) {
            info!(build = %build.uuid, "resolve superseded before fan-out, exiting");
            return Ok(());
        }

        self.transition_build(build.id, BuildStatus::Building, None).await?;

        for (_, deploy, service) in &persisted {
            if !deploy.active {
                continue;
            }
            match service.spec.deploy_type {
                DeployType::Github | DeployType::Docker => {
                    // Docker services pinned to a published image skip the
                    // build; the worker sees the image and short-circuits.
                    if let Some(image) = &service.spec.docker_image {
                        let image_ref = match &image.tag {
                            Some(tag) if !image.docker_image.contains(':') => {
                                format!("{}:{tag}", image.docker_image)
                            }
                            _ => image.docker_image.clone(),
                        };
                        let mut patch = domain::entities::DeployPatch::default();
                        patch.docker_image = Some(Some(image_ref));
                        store::deploys::patch(&self.pool, deploy.id, patch).await?;
                    }
                    self.enqueue_deploy_job(
                        queue_names::BUILD_IMAGE,
                        deploy.id,
                        payload.run_uuid,
                        Duration::ZERO,
                    )
                    .await?;
                }
                DeployType::ExternalHttp | DeployType::Configuration => {
                    // Nothing to build or release.
                    let mut patch = domain::entities::DeployPatch::status(DeployStatus::Ready);
                    if let DeployType::ExternalHttp = service.spec.deploy_type {
                        patch.public_url = Some(
                            service
                                .spec
                                .external_http
                                .as_ref()
                                .map(|e| e.url.clone()),
                        );
                    }
                    store::deploys::patch(&self.pool, deploy.id, patch).await?;
                }
                DeployType::Helm
                | DeployType::Codefresh
                | DeployType::AuroraRestore
                | DeployType::RdsRestore => {
                    self.enqueue_deploy_job(
                        queue_names::DEPLOY,
                        deploy.id,
                        payload.run_uuid,
                        Duration::ZERO,
                    )
                    .await?;
                }
            }
        }

        self.aggregate_build_status(build.id).await?;
        info!(build = %build.uuid, services = persisted.len(), "resolve complete");
        Ok(())
    }
}

fn new_deployable(build: &domain::entities::Build, service: &ResolvedService) -> NewDeployable {
    let spec = &service.spec;
    NewDeployable {
        build_id: build.id,
        name: spec.name.clone(),
        deploy_type: spec.deploy_type,
        branch_name: spec.branch_name.clone(),
        env: spec.env.clone(),
        init_env: spec.init_env.clone(),
        ports: spec.ports.clone(),
        public: spec.public,
        grpc: spec.grpc,
        capacity_type: spec.capacity_type.clone(),
        helm: spec.helm.clone(),
        docker: spec.docker_build.clone().or_else(|| {
            spec.docker_image.as_ref().map(|image| domain::entities::DockerSpec {
                ecr: image.ecr.clone(),
                ..Default::default()
            })
        }),
        codefresh: spec.codefresh.clone(),
        restore: spec.restore.clone(),
        deployment: spec.deployment.clone(),
        keda_scale_to_zero: spec.keda_scale_to_zero.clone(),
        deployment_depends_on: spec.deployment_depends_on.clone(),
        build_uuid: build.uuid.clone(),
    }
}

fn is_config_failure(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::Config(_) | DomainError::Validation(_) | DomainError::DependencyCycle(_)
    )
}
