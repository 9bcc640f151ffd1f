//! Teardown worker: uninstall every active deploy's release, drop the
//! forge-side deployment environment, and mark everything torn down.
//! Idempotent end to end; a torn-down build is a terminal no-op.

use tracing::{info, warn};

use domain::status::{BuildStatus, DeployStatus};
use domain::Result;
use queue::Job;

use crate::service::{BuildService, ResolvePayload};

impl BuildService {
    pub(crate) async fn process_teardown(&self, job: Job) -> Result<()> {
        let payload: ResolvePayload = job.data()?;
        let build = store::builds::get_by_id(&self.pool, payload.build_id).await?;

        if build.status == BuildStatus::TornDown {
            return Ok(());
        }

        let graph = store::builds::load(
            &self.pool,
            &build.uuid,
            "deploys.deployable, pullRequest.repository",
        )
        .await?;
        let Some(graph) = graph else {
            return Ok(());
        };

        // Helm uninstalls; "release not found" is success.
        for deploy in graph.deploys.iter().filter(|d| d.active) {
            let release_name = deploy.release_name();
            if let Err(e) = self.helm.uninstall(&release_name, &build.namespace).await {
                warn!(release = %release_name, "uninstall failed: {e}");
            }
        }

        // Forge deployment environment object, when we created one.
        if let Some(repository) = &graph.repository {
            if let Err(e) = self
                .forge
                .delete_environment(repository, &build.namespace)
                .await
            {
                warn!(build = %build.uuid, "environment delete failed: {e}");
            }
        }

        store::deploys::mark_all_for_build(&self.pool, build.id, DeployStatus::TornDown).await?;
        self.transition_build(build.id, BuildStatus::TornDown, None).await?;
        info!(build = %build.uuid, "environment torn down");
        Ok(())
    }
}
