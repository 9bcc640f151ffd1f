//! The build service: entry points from the HTTP layer, queue wiring, the
//! build-level state machine, and status aggregation across deploys.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use domain::entities::{Build, BuildPatch, PullRequestPatch, Repository};
use domain::status::{BuildStatus, DeployStatus, PullRequestStatus};
use domain::{DomainError, Result};
use github::types::PullRequestEvent;
use github::ForgeClient;
use queue::manager::names as queue_names;
use queue::{LockManager, QueueManager, QueueOptions};
use store::PgPool;

use crate::builder::codefresh::CodefreshCli;
use crate::builder::{ImageBuilder, RegistryProbe};
use crate::comment;
use crate::config_cache::GlobalConfigCache;
use crate::helm::ReleaseDriver;
use crate::ids;
use crate::jobs::JobRunner;

/// Label applied while a build is live; swapped on terminal states.
const LABEL_DEPLOYED: &str = "lifecycle-deployed!";
const LABEL_ERROR: &str = "lifecycle-error!";
const LABEL_TORN_DOWN: &str = "lifecycle-torn-down";
/// PRs carrying this label get a long-lived environment on the static
/// node pool.
const LABEL_STATIC: &str = "lifecycle-static!";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvePayload {
    pub build_id: Uuid,
    pub run_uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployJobPayload {
    pub deploy_id: Uuid,
    pub run_uuid: Uuid,
    /// Consecutive dependency waits; drives the re-enqueue backoff.
    #[serde(default)]
    pub wait_attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJobPayload {
    pub build_id: Uuid,
    pub run_uuid: Uuid,
    pub state: String,
}

pub struct BuildService {
    pub(crate) pool: PgPool,
    pub(crate) queues: Arc<QueueManager>,
    pub(crate) locks: LockManager,
    pub(crate) forge: Arc<ForgeClient>,
    pub(crate) config: GlobalConfigCache,
    pub(crate) builder: Arc<dyn ImageBuilder>,
    pub(crate) probe: Arc<dyn RegistryProbe>,
    pub(crate) helm: Arc<dyn ReleaseDriver>,
    pub(crate) job_runner: Arc<dyn JobRunner>,
    pub(crate) codefresh: CodefreshCli,
}

impl BuildService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        queues: Arc<QueueManager>,
        locks: LockManager,
        forge: Arc<ForgeClient>,
        config: GlobalConfigCache,
        builder: Arc<dyn ImageBuilder>,
        probe: Arc<dyn RegistryProbe>,
        helm: Arc<dyn ReleaseDriver>,
        job_runner: Arc<dyn JobRunner>,
        codefresh: CodefreshCli,
    ) -> Arc<Self> {
        Arc::new(BuildService {
            pool,
            queues,
            locks,
            forge,
            config,
            builder,
            probe,
            helm,
            job_runner,
            codefresh,
        })
    }

    /// Register every queue processor on the shared manager. Called once by
    /// the worker binary.
    pub fn register_workers(self: &Arc<Self>) {
        let resolve_options = QueueOptions {
            attempts: 3,
            concurrency: 2,
            ..Default::default()
        };
        let service = Arc::clone(self);
        self.queues
            .register(queue_names::RESOLVE, resolve_options, move |job| {
                let service = Arc::clone(&service);
                async move { service.process_resolve(job).await }
            });

        let build_options = QueueOptions {
            attempts: 3,
            concurrency: 4,
            ..Default::default()
        };
        let service = Arc::clone(self);
        self.queues
            .register(queue_names::BUILD_IMAGE, build_options, move |job| {
                let service = Arc::clone(&service);
                async move { service.process_build_image(job).await }
            });

        let deploy_options = QueueOptions {
            attempts: 3,
            concurrency: 4,
            ..Default::default()
        };
        let service = Arc::clone(self);
        self.queues
            .register(queue_names::DEPLOY, deploy_options, move |job| {
                let service = Arc::clone(&service);
                async move { service.process_deploy(job).await }
            });

        let webhook_options = QueueOptions {
            concurrency: 2,
            ..Default::default()
        };
        let service = Arc::clone(self);
        self.queues
            .register(queue_names::WEBHOOK, webhook_options, move |job| {
                let service = Arc::clone(&service);
                async move { service.process_webhooks(job).await }
            });

        let teardown_options = QueueOptions {
            attempts: 3,
            concurrency: 2,
            ..Default::default()
        };
        let service = Arc::clone(self);
        self.queues
            .register(queue_names::TEARDOWN, teardown_options, move |job| {
                let service = Arc::clone(&service);
                async move { service.process_teardown(job).await }
            });
    }

    /// Entry point for forge `pull_request` events.
    pub async fn on_pull_request_event(&self, event: &PullRequestEvent) -> Result<()> {
        let installation_id = event
            .installation
            .as_ref()
            .map(|i| i.id)
            .ok_or_else(|| DomainError::Validation("event without installation".to_string()))?;

        let repository = store::repositories::upsert(
            &self.pool,
            event.repository.owner.id,
            event.repository.id,
            installation_id,
            &event.repository.full_name,
            &event.repository.html_url,
        )
        .await?;

        let pr_status = match (event.pull_request.state.as_str(), event.pull_request.merged) {
            ("closed", Some(true)) => PullRequestStatus::Merged,
            ("closed", _) => PullRequestStatus::Closed,
            _ => PullRequestStatus::Open,
        };
        let pull_request = store::pull_requests::upsert(
            &self.pool,
            repository.id,
            event.number,
            &event.pull_request.title,
            pr_status,
            &event.pull_request.head.ref_name,
            &repository.full_name,
            Some(event.pull_request.head.sha.as_str()),
            Some(event.pull_request.user.login.as_str()),
        )
        .await?;

        // Mirror the PR's live label list; label sync on transitions
        // preserves anything lifecycle does not own, so the mirror must
        // stay current.
        let event_labels: Vec<String> = event
            .pull_request
            .labels
            .iter()
            .map(|label| label.name.clone())
            .collect();
        store::pull_requests::set_labels(&self.pool, pull_request.id, &event_labels).await?;

        match event.action.as_str() {
            "opened" | "reopened" | "synchronize" => {
                if !pull_request.deploy_on_update && event.action == "synchronize" {
                    info!(pr = event.number, "deploy-on-update disabled, ignoring synchronize");
                    return Ok(());
                }
                // No lifecycle file, no build.
                let yaml = self
                    .forge
                    .get_yaml_file_content(&repository, &event.pull_request.head.sha)
                    .await?;
                if yaml.is_none() {
                    info!(pr = event.number, repo = %repository.full_name, "no lifecycle config at ref");
                    return Ok(());
                }

                let is_static = event
                    .pull_request
                    .labels
                    .iter()
                    .any(|label| label.name == LABEL_STATIC);
                let build = self
                    .find_or_create_build(
                        &repository,
                        pull_request.id,
                        &event.pull_request.head.sha,
                        is_static,
                    )
                    .await?;
                self.enqueue_resolve(&build).await?;
                self.post_status_comment(&build).await.unwrap_or_else(|e| {
                    warn!(build = %build.uuid, "status comment failed: {e}");
                });
                Ok(())
            }
            "closed" => {
                if let Some(build) =
                    store::builds::find_latest_for_pull_request(&self.pool, pull_request.id).await?
                {
                    if build.status != BuildStatus::TornDown {
                        self.enqueue_teardown(&build.uuid).await?;
                    }
                }
                Ok(())
            }
            other => {
                info!(action = %other, "ignoring pull request action");
                Ok(())
            }
        }
    }

    async fn find_or_create_build(
        &self,
        repository: &Repository,
        pull_request_id: Uuid,
        sha: &str,
        is_static: bool,
    ) -> Result<Build> {
        let existing =
            store::builds::find_latest_for_pull_request(&self.pool, pull_request_id).await?;

        let build = match existing {
            Some(build) if build.status != BuildStatus::TornDown => build,
            _ => {
                // Retry on uuid collision; the unique constraint is the
                // arbiter.
                loop {
                    let uuid = ids::new_build_uuid();
                    let namespace = Build::namespace_for(&uuid);
                    match store::builds::create(
                        &self.pool,
                        &uuid,
                        pull_request_id,
                        repository.default_env_id,
                        &namespace,
                        is_static,
                        true,
                    )
                    .await
                    {
                        Ok(build) => break build,
                        Err(DomainError::Conflict(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        let mut patch = BuildPatch::default();
        patch.sha = Some(sha.to_string());
        if build.is_static != is_static {
            patch.is_static = Some(is_static);
        }
        if build.status.can_transition_to(BuildStatus::Queued) {
            patch.status = Some(BuildStatus::Queued);
            patch.status_message = Some(None);
        }
        store::builds::patch(&self.pool, build.id, patch).await
    }

    /// Stamp a fresh run uuid and enqueue the resolve job. The run uuid is
    /// the supersedence token: workers holding an older one exit silently.
    pub async fn enqueue_resolve(&self, build: &Build) -> Result<Uuid> {
        let run_uuid = Uuid::new_v4();
        let mut patch = BuildPatch::default();
        patch.run_uuid = Some(run_uuid);
        store::builds::patch(&self.pool, build.id, patch).await?;

        let payload = ResolvePayload {
            build_id: build.id,
            run_uuid,
        };
        self.queues
            .enqueue(queue_names::RESOLVE, serde_json::to_value(payload).unwrap_or_default())
            .await?;
        info!(build = %build.uuid, run = %run_uuid, "resolve enqueued");
        Ok(run_uuid)
    }

    /// UI redeploy: re-enter the pipeline at resolve.
    pub async fn enqueue_redeploy(&self, build_uuid: &str) -> Result<()> {
        let build = store::builds::get_by_uuid(&self.pool, build_uuid).await?;
        if build.status == BuildStatus::TornDown {
            return Err(DomainError::Validation(format!(
                "build {build_uuid} is torn down"
            )));
        }
        if build.status.can_transition_to(BuildStatus::Queued) {
            store::builds::transition_status(&self.pool, build.id, BuildStatus::Queued, None)
                .await?;
        }
        self.enqueue_resolve(&build).await?;
        Ok(())
    }

    /// UI/event teardown: mark and enqueue; the teardown worker does the
    /// actual uninstalls.
    pub async fn enqueue_teardown(&self, build_uuid: &str) -> Result<()> {
        let build = store::builds::get_by_uuid(&self.pool, build_uuid).await?;
        if build.status == BuildStatus::TornDown || build.status == BuildStatus::TearingDown {
            return Ok(());
        }
        let build =
            store::builds::transition_status(&self.pool, build.id, BuildStatus::TearingDown, None)
                .await?;
        let run_uuid = build.run_uuid.unwrap_or_else(Uuid::new_v4);
        let payload = ResolvePayload {
            build_id: build.id,
            run_uuid,
        };
        self.queues
            .enqueue(queue_names::TEARDOWN, serde_json::to_value(payload).unwrap_or_default())
            .await?;
        Ok(())
    }

    /// Force-run webhooks for the build's current status; returns how many
    /// entries matched.
    pub async fn enqueue_webhooks_for(&self, build: &Build, status: BuildStatus) -> Result<usize> {
        let webhooks = crate::webhooks::parse_webhooks(build.webhooks_yaml.as_deref())?;
        let state = status.as_str();
        let matching = webhooks.iter().filter(|w| w.state == state).count();
        if matching == 0 {
            return Ok(0);
        }
        let payload = WebhookJobPayload {
            build_id: build.id,
            run_uuid: build.run_uuid.unwrap_or_else(Uuid::new_v4),
            state: state.to_string(),
        };
        self.queues
            .enqueue(queue_names::WEBHOOK, serde_json::to_value(payload).unwrap_or_default())
            .await?;
        Ok(matching)
    }

    /// True when the job's run token has been superseded by a newer fan-out;
    /// the holder must exit without side effects.
    pub(crate) fn run_superseded(build: &Build, run_uuid: Uuid) -> bool {
        build.run_uuid.map(|current| current != run_uuid).unwrap_or(false)
    }

    /// Build-level transition plus its side effects: status comment, label
    /// sync, webhook fan-out.
    pub(crate) async fn transition_build(
        &self,
        build_id: Uuid,
        next: BuildStatus,
        message: Option<String>,
    ) -> Result<Build> {
        let current = store::builds::get_by_id(&self.pool, build_id).await?;
        if current.status == next {
            return Ok(current);
        }
        let build =
            store::builds::transition_status(&self.pool, build_id, next, message).await?;
        info!(build = %build.uuid, status = %next, "build transition");

        self.post_status_comment(&build).await.unwrap_or_else(|e| {
            warn!(build = %build.uuid, "status comment failed: {e}");
        });
        self.sync_labels(&build).await.unwrap_or_else(|e| {
            warn!(build = %build.uuid, "label sync failed: {e}");
        });

        if next.fires_webhooks() {
            if let Err(e) = self.enqueue_webhooks_for(&build, next).await {
                warn!(build = %build.uuid, "webhook enqueue failed: {e}");
            }
        }
        Ok(build)
    }

    /// Recompute the build status from its active deploys; called after
    /// every deploy transition.
    pub(crate) async fn aggregate_build_status(&self, build_id: Uuid) -> Result<()> {
        let build = store::builds::get_by_id(&self.pool, build_id).await?;
        if matches!(
            build.status,
            BuildStatus::TearingDown | BuildStatus::TornDown | BuildStatus::ConfigError
        ) {
            return Ok(());
        }

        let siblings = store::deploys::sibling_statuses(&self.pool, build_id).await?;
        if siblings.is_empty() {
            return Ok(());
        }

        if let Some((name, status)) = siblings.iter().find(|(_, s)| s.is_failure()) {
            self.transition_build(
                build_id,
                BuildStatus::Error,
                Some(format!("service {name} failed with {status}")),
            )
            .await?;
            return Ok(());
        }

        if siblings.iter().all(|(_, s)| *s == DeployStatus::Ready) {
            self.transition_build(build_id, BuildStatus::Deployed, None).await?;
        }
        Ok(())
    }

    pub(crate) async fn post_status_comment(&self, build: &Build) -> Result<()> {
        let graph = store::builds::load(&self.pool, &build.uuid, "deploys.deployable, pullRequest.repository")
            .await?
            .ok_or_else(|| DomainError::not_found("build", &build.uuid))?;
        let (Some(pull_request), Some(repository)) = (&graph.pull_request, &graph.repository)
        else {
            return Ok(());
        };

        let body = comment::render_status_comment(build, &graph.deploys, &graph.deployables);
        let posted = self
            .forge
            .create_or_update_pull_request_comment(
                repository,
                pull_request.pr_number,
                pull_request.status_comment_id,
                &body,
            )
            .await?;

        if pull_request.status_comment_id != Some(posted.id) {
            let mut patch = PullRequestPatch::default();
            patch.status_comment_id = Some(posted.id);
            store::pull_requests::patch(&self.pool, pull_request.id, patch).await?;
        }
        Ok(())
    }

    async fn sync_labels(&self, build: &Build) -> Result<()> {
        let status_label = match build.status {
            BuildStatus::Deployed => LABEL_DEPLOYED,
            BuildStatus::Error | BuildStatus::ConfigError => LABEL_ERROR,
            BuildStatus::TornDown => LABEL_TORN_DOWN,
            _ => return Ok(()),
        };

        let graph = store::builds::load(&self.pool, &build.uuid, "pullRequest.repository").await?;
        let Some(graph) = graph else { return Ok(()) };
        let (Some(pull_request), Some(repository)) = (&graph.pull_request, &graph.repository)
        else {
            return Ok(());
        };

        // The label PUT replaces the PR's whole set, so the computed set
        // must be complete: everything lifecycle does not own is preserved,
        // only the status label is swapped, and the static marker stays in
        // step with the build.
        let desired = desired_labels(&pull_request.labels.0, status_label, build.is_static);

        self.forge
            .update_labels(repository, pull_request.pr_number, &desired)
            .await?;
        store::pull_requests::set_labels(&self.pool, pull_request.id, &desired).await?;
        Ok(())
    }

    /// Fan a deploy out to its phase queue.
    pub(crate) async fn enqueue_deploy_job(
        &self,
        queue: &str,
        deploy_id: Uuid,
        run_uuid: Uuid,
        delay: Duration,
    ) -> Result<()> {
        let payload = DeployJobPayload {
            deploy_id,
            run_uuid,
            wait_attempt: 0,
        };
        self.queues
            .enqueue_delayed(queue, serde_json::to_value(payload).unwrap_or_default(), delay)
            .await
    }

    /// Re-enqueue a dependency-blocked deploy with the wait counter bumped.
    pub(crate) async fn requeue_waiting_deploy(
        &self,
        payload: &DeployJobPayload,
        delay: Duration,
    ) -> Result<()> {
        let next = DeployJobPayload {
            deploy_id: payload.deploy_id,
            run_uuid: payload.run_uuid,
            wait_attempt: payload.wait_attempt + 1,
        };
        self.queues
            .enqueue_delayed(
                queue_names::DEPLOY,
                serde_json::to_value(next).unwrap_or_default(),
                delay,
            )
            .await
    }
}

/// Complete label set for a PR after a build transition: non-lifecycle
/// labels untouched, exactly one status label, static marker matching the
/// build.
fn desired_labels(existing: &[String], status_label: &str, is_static: bool) -> Vec<String> {
    const OWNED: [&str; 3] = [LABEL_DEPLOYED, LABEL_ERROR, LABEL_TORN_DOWN];

    let mut desired: Vec<String> = existing
        .iter()
        .filter(|label| !OWNED.contains(&label.as_str()))
        .cloned()
        .collect();
    if is_static && !desired.iter().any(|label| label == LABEL_STATIC) {
        desired.push(LABEL_STATIC.to_string());
    }
    desired.push(status_label.to_string());
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use std::collections::BTreeMap;

    fn build_with_run(run_uuid: Option<Uuid>) -> Build {
        Build {
            id: Uuid::new_v4(),
            uuid: "tidy-otter-4f2a".to_string(),
            pull_request_id: Uuid::new_v4(),
            environment_id: None,
            status: BuildStatus::Building,
            status_message: None,
            sha: None,
            namespace: "env-tidy-otter-4f2a".to_string(),
            enable_full_yaml: true,
            is_static: false,
            webhooks_yaml: None,
            dependency_graph: None,
            dashboard_links: Json(vec![]),
            manifest: None,
            run_uuid,
            comment_runtime_env: Json(BTreeMap::new()),
            enabled_features: Json(vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn superseded_run_is_detected() {
        let current = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let build = build_with_run(Some(current));
        assert!(BuildService::run_superseded(&build, stale));
        assert!(!BuildService::run_superseded(&build, current));
        // No run uuid on the build yet: nothing to supersede.
        assert!(!BuildService::run_superseded(&build_with_run(None), stale));
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn desired_labels_preserves_foreign_labels() {
        let existing = labels(&["needs-review", "lifecycle-deployed!", "team/payments"]);
        let desired = desired_labels(&existing, LABEL_ERROR, false);
        assert_eq!(
            desired,
            labels(&["needs-review", "team/payments", "lifecycle-error!"])
        );
    }

    #[test]
    fn desired_labels_keeps_the_static_marker() {
        // Marker present on the PR: kept in place, not duplicated.
        let existing = labels(&["lifecycle-static!", "lifecycle-error!"]);
        let desired = desired_labels(&existing, LABEL_DEPLOYED, true);
        assert_eq!(desired, labels(&["lifecycle-static!", "lifecycle-deployed!"]));

        // Marker missing but the build is static: restored.
        let desired = desired_labels(&labels(&[]), LABEL_DEPLOYED, true);
        assert_eq!(desired, labels(&["lifecycle-static!", "lifecycle-deployed!"]));
    }

    #[test]
    fn desired_labels_swaps_exactly_one_status_label() {
        let existing = labels(&["lifecycle-deployed!"]);
        let desired = desired_labels(&existing, LABEL_TORN_DOWN, false);
        assert_eq!(desired, labels(&["lifecycle-torn-down"]));
    }
}
