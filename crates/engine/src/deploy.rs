//! The deploy worker: dependency gating, Helm release (or external
//! pipeline), readiness wait, and the final status patch that feeds
//! build-level aggregation.

use std::time::Duration;
use tracing::{info, warn};

use domain::entities::{Build, Deploy, Deployable, DeployPatch};
use domain::status::{DeployStatus, DeployType};
use domain::{DomainError, Result};
use queue::lock::keys;
use queue::{Backoff, Job};

use crate::helm::{self, HelmRelease, ReleaseState};
use crate::service::{BuildService, DeployJobPayload};

const LOCK_TTL: Duration = Duration::from_secs(3600);
const RELEASE_WAIT: Duration = Duration::from_secs(900);

impl BuildService {
    pub(crate) async fn process_deploy(&self, job: Job) -> Result<()> {
        let payload: DeployJobPayload = job.data()?;

        let Some(guard) = self
            .locks
            .try_acquire(&keys::deploy_deploy(payload.deploy_id), LOCK_TTL)
            .await?
        else {
            info!(deploy = %payload.deploy_id, "deploy already in flight, exiting");
            return Ok(());
        };

        let outcome = self.deploy_service(&payload).await;
        guard.release().await.ok();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if matches!(e, DomainError::Permanent(_)) => {
                let deploy = store::deploys::patch(
                    &self.pool,
                    payload.deploy_id,
                    DeployPatch::status_with_message(
                        DeployStatus::DeployFailed,
                        e.status_message(),
                    ),
                )
                .await?;
                self.aggregate_build_status(deploy.build_id).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn deploy_service(&self, payload: &DeployJobPayload) -> Result<()> {
        let deploy = store::deploys::get_by_id(&self.pool, payload.deploy_id).await?;
        let build = store::builds::get_by_id(&self.pool, deploy.build_id).await?;
        if Self::run_superseded(&build, payload.run_uuid) {
            info!(deploy = %deploy.uuid, "deploy superseded, exiting");
            return Ok(());
        }
        if !deploy.active {
            return Ok(());
        }

        let deployable = store::deployables::get_by_id(&self.pool, deploy.deployable_id).await?;

        // Dependency gate: every declared predecessor must be ready before
        // this deploy may enter `Deploying`.
        if let Some(blocking) = self.unready_dependency(&build, &deployable).await? {
            let delay = Backoff::default().delay(payload.wait_attempt);
            info!(
                deploy = %deploy.uuid,
                dependency = %blocking,
                attempt = payload.wait_attempt,
                "dependency not ready, waiting {delay:?}"
            );
            store::deploys::patch(
                &self.pool,
                deploy.id,
                DeployPatch::status_with_message(
                    DeployStatus::Waiting,
                    format!("waiting for {blocking}"),
                ),
            )
            .await?;
            self.requeue_waiting_deploy(payload, delay).await?;
            return Ok(());
        }

        if build.status.can_transition_to(domain::status::BuildStatus::Deploying) {
            store::builds::transition_status(
                &self.pool,
                build.id,
                domain::status::BuildStatus::Deploying,
                None,
            )
            .await?;
        }

        match deployable.deploy_type {
            DeployType::Github | DeployType::Docker | DeployType::Helm => {
                self.deploy_via_helm(&build, &deploy, &deployable).await?;
            }
            DeployType::Codefresh => {
                self.deploy_via_pipeline(&deploy, &deployable).await?;
            }
            DeployType::AuroraRestore | DeployType::RdsRestore => {
                // Restore services run their external pipeline when one is
                // configured; the clone scripts themselves live outside.
                self.deploy_restore(&deploy, &deployable).await?;
            }
            DeployType::ExternalHttp | DeployType::Configuration => {
                store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Ready))
                    .await?;
            }
        }

        self.aggregate_build_status(build.id).await?;
        Ok(())
    }

    /// First declared dependency that is active but not yet ready.
    async fn unready_dependency(
        &self,
        build: &Build,
        deployable: &Deployable,
    ) -> Result<Option<String>> {
        for dependency in &deployable.deployment_depends_on.0 {
            let Some(peer) =
                store::deployables::find_by_name(&self.pool, build.id, dependency).await?
            else {
                continue;
            };
            let Some(peer_deploy) = store::deploys::find_by_uuid(&self.pool, &peer.deploy_uuid())
                .await?
            else {
                continue;
            };
            if peer_deploy.active && peer_deploy.status != DeployStatus::Ready {
                return Ok(Some(dependency.clone()));
            }
        }
        Ok(None)
    }

    async fn deploy_via_helm(
        &self,
        build: &Build,
        deploy: &Deploy,
        deployable: &Deployable,
    ) -> Result<()> {
        let global = self.config.get().await?;
        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Deploying))
            .await?;

        // Forge deployment object around the release (best-effort).
        let github_deployment = self.create_forge_deployment(build, deploy).await;

        let release_name = deploy.release_name();

        // Redeploy pre-step: stuck pending releases block upgrades.
        match self.helm.list_pending(&build.namespace, &release_name).await {
            Ok(pending) => {
                for name in pending {
                    warn!(release = %name, "uninstalling pending release before upgrade");
                    self.helm.uninstall(&name, &build.namespace).await.ok();
                }
            }
            Err(e) => warn!(release = %release_name, "pending-release listing failed: {e}"),
        }

        let helm_spec = deployable.helm.as_ref().map(|j| j.0.clone()).unwrap_or_default();
        let chart = if helm_spec.chart.name.is_empty() {
            global.org_chart_name.clone()
        } else {
            helm_spec.chart.name.clone()
        };
        let values = helm::build_values(build, deploy, deployable, &global, &deploy.env.0);
        let release = HelmRelease {
            release_name: release_name.clone(),
            namespace: build.namespace.clone(),
            chart,
            repo_url: helm_spec.chart.repo_url.clone(),
            version: helm_spec.chart.version.clone(),
            values,
            value_files: helm_spec.chart.value_files.clone(),
            extra_args: helm_spec
                .args
                .as_deref()
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        self.helm.upgrade(&release).await?;
        let state =
            helm::wait_for_release(self.helm.as_ref(), &release_name, &build.namespace, RELEASE_WAIT)
                .await?;

        match state {
            ReleaseState::Deployed => {
                let public_url = deployable.public.then(|| {
                    format!("https://{release_name}.{}", global.domain_defaults.http)
                });
                let mut patch = DeployPatch::status(DeployStatus::Ready);
                patch.internal_hostname = Some(Some(release_name.clone()));
                if public_url.is_some() {
                    patch.public_url = Some(public_url.clone());
                }
                patch.port = Some(deployable.first_port().map(i32::from));
                patch.replica_count = Some(Some(1));
                patch.is_running_latest = Some(true);
                patch.running_image = Some(deploy.docker_image.clone());
                store::deploys::patch(&self.pool, deploy.id, patch).await?;

                self.report_forge_deployment(build, github_deployment, true, public_url)
                    .await;
                Ok(())
            }
            state => {
                self.report_forge_deployment(build, github_deployment, false, None)
                    .await;
                Err(DomainError::Permanent(format!(
                    "release {release_name} did not become ready ({state:?})"
                )))
            }
        }
    }

    async fn deploy_via_pipeline(&self, deploy: &Deploy, deployable: &Deployable) -> Result<()> {
        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Deploying))
            .await?;

        let pipeline_id = deployable
            .codefresh
            .as_ref()
            .map(|j| j.0.pipeline_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DomainError::Config(format!("service {} has no pipeline id", deployable.name))
            })?;

        let run_id = self
            .codefresh
            .trigger(&pipeline_id, deploy.branch_name.as_deref(), &deploy.env.0)
            .await?;
        let mut patch = DeployPatch::default();
        patch.deploy_pipeline_id = Some(Some(run_id.clone()));
        store::deploys::patch(&self.pool, deploy.id, patch).await?;

        let status = self.codefresh.wait_for(&run_id).await?;
        match status {
            crate::builder::PipelineStatus::Success => {
                store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Ready))
                    .await?;
                Ok(())
            }
            other => Err(DomainError::Permanent(format!(
                "pipeline {run_id} finished {other:?}"
            ))),
        }
    }

    async fn deploy_restore(&self, deploy: &Deploy, deployable: &Deployable) -> Result<()> {
        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Deploying))
            .await?;
        let restore_pipeline = deployable
            .restore
            .as_ref()
            .and_then(|j| j.0.pipeline_id.clone());
        match restore_pipeline {
            Some(pipeline_id) => {
                let run_id = self
                    .codefresh
                    .trigger(&pipeline_id, None, &deploy.env.0)
                    .await?;
                let status = self.codefresh.wait_for(&run_id).await?;
                if status != crate::builder::PipelineStatus::Success {
                    return Err(DomainError::Permanent(format!(
                        "restore pipeline {run_id} finished {status:?}"
                    )));
                }
            }
            None => {
                info!(deploy = %deploy.uuid, "restore service has no pipeline; marking ready");
            }
        }
        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Ready))
            .await?;
        Ok(())
    }

    async fn create_forge_deployment(&self, build: &Build, deploy: &Deploy) -> Option<i64> {
        let graph = store::builds::load(&self.pool, &build.uuid, "pullRequest.repository")
            .await
            .ok()
            .flatten()?;
        let repository = graph.repository?;
        let sha = deploy.sha.as_deref()?;
        match self
            .forge
            .create_deployment(&repository, sha, &build.namespace)
            .await
        {
            Ok(deployment) => {
                let mut patch = DeployPatch::default();
                patch.github_deployment_id = Some(Some(deployment.id));
                store::deploys::patch(&self.pool, deploy.id, patch).await.ok();
                Some(deployment.id)
            }
            Err(e) => {
                warn!(deploy = %deploy.uuid, "forge deployment create failed: {e}");
                None
            }
        }
    }

    async fn report_forge_deployment(
        &self,
        build: &Build,
        deployment_id: Option<i64>,
        success: bool,
        environment_url: Option<String>,
    ) {
        let Some(deployment_id) = deployment_id else { return };
        let Ok(Some(graph)) =
            store::builds::load(&self.pool, &build.uuid, "pullRequest.repository").await
        else {
            return;
        };
        let Some(repository) = graph.repository else { return };

        let state = if success { "success" } else { "failure" };
        if let Err(e) = self
            .forge
            .create_deployment_status(&repository, deployment_id, state, environment_url.as_deref())
            .await
        {
            warn!(build = %build.uuid, "forge deployment status failed: {e}");
        }
    }
}

