//! The image-build worker: fingerprint the requested image, skip the build
//! when the registry already has the tag, otherwise drive one of the two
//! build back-ends, then hand the deploy to the deploy queue.

use std::time::Duration;
use tracing::{info, warn};

use domain::entities::DeployPatch;
use domain::status::{DeployStatus, DeployType};
use domain::{DomainError, Result};
use queue::lock::keys;
use queue::manager::names as queue_names;
use queue::Job;

use crate::builder::{fingerprint_tag, ImageBuildRequest};
use crate::service::{BuildService, DeployJobPayload};

const LOCK_TTL: Duration = Duration::from_secs(3600);

impl BuildService {
    pub(crate) async fn process_build_image(&self, job: Job) -> Result<()> {
        let payload: DeployJobPayload = job.data()?;

        // Single-flight per deploy: a second job for the same deploy exits.
        let Some(guard) = self
            .locks
            .try_acquire(&keys::deploy_build(payload.deploy_id), LOCK_TTL)
            .await?
        else {
            info!(deploy = %payload.deploy_id, "build already in flight, exiting");
            return Ok(());
        };

        let outcome = self.build_deploy_image(&payload).await;
        guard.release().await.ok();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if matches!(e, DomainError::Permanent(_)) => {
                let deploy = store::deploys::patch(
                    &self.pool,
                    payload.deploy_id,
                    DeployPatch::status_with_message(
                        DeployStatus::BuildFailed,
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

    async fn build_deploy_image(&self, payload: &DeployJobPayload) -> Result<()> {
        let deploy = store::deploys::get_by_id(&self.pool, payload.deploy_id).await?;
        let build = store::builds::get_by_id(&self.pool, deploy.build_id).await?;
        if Self::run_superseded(&build, payload.run_uuid) {
            info!(deploy = %deploy.uuid, "image build superseded, exiting");
            return Ok(());
        }
        if !deploy.active {
            return Ok(());
        }

        let deployable = store::deployables::get_by_id(&self.pool, deploy.deployable_id).await?;
        let pull_request =
            store::pull_requests::get_by_id(&self.pool, build.pull_request_id).await?;
        let repository =
            store::repositories::get_by_id(&self.pool, pull_request.repository_id).await?;
        let global = self.config.get().await?;

        // A pinned published image needs no build at all.
        if deployable.deploy_type == DeployType::Docker {
            if let Some(image) = deploy.docker_image.clone().filter(|i| i.contains(':')) {
                info!(deploy = %deploy.uuid, image = %image, "using published image");
                let mut patch = DeployPatch::status(DeployStatus::Built);
                patch.running_image = Some(Some(image));
                store::deploys::patch(&self.pool, deploy.id, patch).await?;
                self.enqueue_deploy_job(
                    queue_names::DEPLOY,
                    deploy.id,
                    payload.run_uuid,
                    Duration::ZERO,
                )
                .await?;
                return Ok(());
            }
        }

        let sha = deploy
            .sha
            .clone()
            .ok_or_else(|| DomainError::Config(format!("deploy {} has no sha", deploy.uuid)))?;
        let docker = deployable.docker.as_ref().map(|j| j.0.clone()).unwrap_or_default();
        let image_repo = docker
            .ecr
            .clone()
            .unwrap_or_else(|| format!("lifecycle/{}", deployable.name));

        // Unguarded phase writes: a retried job may re-enter from any
        // earlier phase, and this worker holds the deploy's build lock.
        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Cloning))
            .await?;

        let tag = fingerprint_tag(&sha, &docker.dockerfile_path, &deploy.env.0, false);
        let image_ref = format!("{}/{image_repo}:{tag}", global.image_registry);

        store::deploys::patch(&self.pool, deploy.id, DeployPatch::status(DeployStatus::Building))
            .await?;

        let exists = self
            .probe
            .tag_exists(&global.image_registry, &image_repo, &tag)
            .await
            .unwrap_or_else(|e| {
                warn!(deploy = %deploy.uuid, "registry probe failed, building anyway: {e}");
                false
            });

        let mut patch = DeployPatch::default();
        if exists {
            info!(deploy = %deploy.uuid, tag = %tag, "image already in registry, skipping build");
            patch.docker_image = Some(Some(image_ref.clone()));
        } else {
            let request = ImageBuildRequest {
                deploy_uuid: deploy.uuid.clone(),
                build_uuid: build.uuid.clone(),
                service_name: deployable.name.clone(),
                repository_full_name: repository.full_name.clone(),
                installation_id: repository.installation_id,
                branch: deploy
                    .branch_name
                    .clone()
                    .unwrap_or_else(|| pull_request.branch_name.clone()),
                sha: sha.clone(),
                dockerfile_path: docker.dockerfile_path.clone(),
                init_container: false,
                build_args: deploy.env.0.clone(),
                image_repo: image_repo.clone(),
                tag: tag.clone(),
                namespace: build.namespace.clone(),
                author: pull_request.github_login.clone(),
                post_build_pipeline_id: docker.after_build_pipeline_id.clone(),
            };
            let outcome = self.builder.build_image(&request).await?;
            patch.docker_image = Some(Some(outcome.image_ref));
            patch.build_logs = Some(Some(outcome.logs));
            patch.deploy_pipeline_id = Some(outcome.pipeline_id);
        }

        // Init container image, when the service declares one.
        if let Some(init_dockerfile) = docker.init_dockerfile_path.clone() {
            let init_tag = fingerprint_tag(&sha, &init_dockerfile, &deploy.init_env.0, true);
            let init_exists = self
                .probe
                .tag_exists(&global.image_registry, &image_repo, &init_tag)
                .await
                .unwrap_or(false);
            if init_exists {
                patch.init_docker_image =
                    Some(Some(format!("{}/{image_repo}:{init_tag}", global.image_registry)));
            } else {
                let request = ImageBuildRequest {
                    deploy_uuid: deploy.uuid.clone(),
                    build_uuid: build.uuid.clone(),
                    service_name: deployable.name.clone(),
                    repository_full_name: repository.full_name.clone(),
                    installation_id: repository.installation_id,
                    branch: deploy
                        .branch_name
                        .clone()
                        .unwrap_or_else(|| pull_request.branch_name.clone()),
                    sha: sha.clone(),
                    dockerfile_path: init_dockerfile,
                    init_container: true,
                    build_args: deploy.init_env.0.clone(),
                    image_repo: image_repo.clone(),
                    tag: init_tag,
                    namespace: build.namespace.clone(),
                    author: pull_request.github_login.clone(),
                    post_build_pipeline_id: None,
                };
                let outcome = self.builder.build_image(&request).await?;
                patch.init_docker_image = Some(Some(outcome.image_ref));
            }
        }

        patch.status = Some(DeployStatus::Built);
        patch.tag = Some(Some(tag));
        store::deploys::patch(&self.pool, deploy.id, patch).await?;

        self.enqueue_deploy_job(queue_names::DEPLOY, deploy.id, payload.run_uuid, Duration::ZERO)
            .await?;
        Ok(())
    }
}
