//! Helm releases.
//!
//! Values come from three layers (chart defaults already folded in by the
//! resolver, the deployable's own values, then derived per-deploy values),
//! merged per key with the later layer winning. The release itself goes
//! through the `helm` CLI; readiness is polled on release status.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use domain::entities::{Build, Deploy, Deployable, GlobalConfig};
use domain::{DomainError, Result};
use queue::Backoff;
use resolver::merge::merge_key_value_arrays;

/// Seconds a static build's deploy job lives after finishing.
pub const STATIC_JOB_TTL_SECS: u64 = 86400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Deployed,
    Pending,
    Failed,
    NotFound,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HelmRelease {
    pub release_name: String,
    pub namespace: String,
    pub chart: String,
    pub repo_url: Option<String>,
    pub version: Option<String>,
    pub values: Vec<String>,
    pub value_files: Vec<String>,
    pub extra_args: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseDriver: Send + Sync {
    async fn upgrade(&self, release: &HelmRelease) -> Result<()>;
    /// Idempotent: a missing release is success.
    async fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()>;
    async fn status(&self, release_name: &str, namespace: &str) -> Result<ReleaseState>;
    /// Pending releases matching a name filter, for the redeploy pre-step.
    async fn list_pending(&self, namespace: &str, filter: &str) -> Result<Vec<String>>;
}

pub struct HelmCli {
    binary: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        HelmCli {
            binary: "helm".to_string(),
        }
    }
}

impl HelmCli {
    async fn exec(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| DomainError::Transient(format!("helm exec: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(DomainError::Permanent(format!(
                "helm {}: {stderr}",
                args.first().map(String::as_str).unwrap_or("")
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl ReleaseDriver for HelmCli {
    async fn upgrade(&self, release: &HelmRelease) -> Result<()> {
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            release.release_name.clone(),
            release.chart.clone(),
            "--namespace".into(),
            release.namespace.clone(),
            "--create-namespace".into(),
        ];
        if let Some(repo) = &release.repo_url {
            args.push("--repo".into());
            args.push(repo.clone());
        }
        if let Some(version) = &release.version {
            args.push("--version".into());
            args.push(version.clone());
        }
        for file in &release.value_files {
            args.push("-f".into());
            args.push(file.clone());
        }
        for value in &release.values {
            args.push("--set".into());
            args.push(value.clone());
        }
        args.extend(release.extra_args.iter().cloned());

        info!(release = %release.release_name, namespace = %release.namespace, "helm upgrade");
        self.exec(&args).await?;
        Ok(())
    }

    async fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()> {
        let args: Vec<String> = vec![
            "uninstall".into(),
            release_name.into(),
            "--namespace".into(),
            namespace.into(),
        ];
        match self.exec(&args).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn status(&self, release_name: &str, namespace: &str) -> Result<ReleaseState> {
        let args: Vec<String> = vec![
            "status".into(),
            release_name.into(),
            "--namespace".into(),
            namespace.into(),
            "-o".into(),
            "json".into(),
        ];
        let stdout = match self.exec(&args).await {
            Ok(stdout) => stdout,
            Err(e) if e.to_string().contains("not found") => return Ok(ReleaseState::NotFound),
            Err(e) => return Err(e),
        };
        let parsed: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| DomainError::Transient(format!("helm status decode: {e}")))?;
        let raw = parsed
            .get("info")
            .and_then(|info| info.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("");
        Ok(match raw {
            "deployed" => ReleaseState::Deployed,
            s if s.starts_with("pending") => ReleaseState::Pending,
            "failed" => ReleaseState::Failed,
            "uninstalled" | "uninstalling" => ReleaseState::NotFound,
            _ => ReleaseState::Unknown,
        })
    }

    async fn list_pending(&self, namespace: &str, filter: &str) -> Result<Vec<String>> {
        let args: Vec<String> = vec![
            "list".into(),
            "--namespace".into(),
            namespace.into(),
            "--pending".into(),
            "--filter".into(),
            filter.into(),
            "-o".into(),
            "json".into(),
        ];
        let stdout = self.exec(&args).await?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(stdout.trim()).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .filter_map(|entry| entry.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .collect())
    }
}

/// Env keys double their underscores so the downstream CLI's dot-to-
/// underscore rewrite round-trips.
pub fn escape_env_key(key: &str) -> String {
    key.replace('_', "__")
}

/// Assemble the ordered `--set` list for one deploy.
pub fn build_values(
    build: &Build,
    deploy: &Deploy,
    deployable: &Deployable,
    global: &GlobalConfig,
    env: &BTreeMap<String, String>,
) -> Vec<String> {
    let helm = deployable.helm.as_ref().map(|j| &j.0);
    let chart_values: Vec<String> = helm.map(|h| h.chart.values.clone()).unwrap_or_default();
    let release_name = deploy.release_name();

    let mut derived: Vec<String> = vec![
        format!("fullnameOverride={release_name}"),
        format!("commonLabels.name={release_name}"),
        format!("commonLabels.lc__uuid={}", build.uuid),
    ];
    if let Some(image) = &deploy.docker_image {
        derived.push(format!("image={image}"));
    }
    if let Some(init_image) = &deploy.init_docker_image {
        derived.push(format!("initImage={init_image}"));
    }
    let disable_ingress = helm.map(|h| h.disable_ingress_host).unwrap_or(false);
    if deployable.public && !disable_ingress {
        derived.push(format!(
            "ingress.host={}.{}",
            release_name, global.domain_defaults.http
        ));
    }
    if let Some(allow_list) = helm
        .map(|h| h.override_default_ip_whitelist.clone())
        .filter(|list| !list.is_empty())
    {
        derived.push(format!("ingress.ipWhitelist={{{}}}", allow_list.join(",")));
    }
    if deployable.grpc {
        let grpc_domain = global
            .domain_defaults
            .grpc
            .as_deref()
            .unwrap_or(&global.domain_defaults.http);
        derived.push("grpc.enabled=true".to_string());
        derived.push(format!("grpc.host={release_name}-grpc.{grpc_domain}"));
    }
    if build.is_static {
        derived.push("nodeSelector.lifecycle/node-pool=static".to_string());
        derived.push("tolerations[0].key=lifecycle/static".to_string());
        derived.push("tolerations[0].operator=Exists".to_string());
    }
    if let Some(keda) = deployable.keda_scale_to_zero.as_ref().map(|j| &j.0) {
        derived.push(format!("autoscaling.scaleToZero={}", keda.enabled));
        if let Some(min) = keda.min_replicas {
            derived.push(format!("autoscaling.minReplicas={min}"));
        }
        if let Some(max) = keda.max_replicas {
            derived.push(format!("autoscaling.maxReplicas={max}"));
        }
    }

    let resource_type = helm
        .and_then(|h| h.helm_type.clone())
        .unwrap_or_else(|| "deployment".to_string());
    for (key, value) in env {
        derived.push(format!(
            "{resource_type}.env.{}={value}",
            escape_env_key(key)
        ));
    }

    merge_key_value_arrays(&chart_values, &derived, '=')
}

/// Wait for the release to report deployed; bounded exponential backoff.
pub async fn wait_for_release(
    driver: &dyn ReleaseDriver,
    release_name: &str,
    namespace: &str,
    max_wait: Duration,
) -> Result<ReleaseState> {
    let backoff = Backoff::default();
    let deadline = tokio::time::Instant::now() + max_wait;
    let mut attempt = 0;

    loop {
        match driver.status(release_name, namespace).await? {
            ReleaseState::Deployed => return Ok(ReleaseState::Deployed),
            ReleaseState::Failed => return Ok(ReleaseState::Failed),
            state @ (ReleaseState::Pending | ReleaseState::Unknown | ReleaseState::NotFound) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!(release = %release_name, "release readiness wait timed out in {state:?}");
                    return Ok(state);
                }
            }
        }
        tokio::time::sleep(backoff.delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn fixture() -> (Build, Deploy, Deployable, GlobalConfig) {
        let build = Build {
            id: Uuid::new_v4(),
            uuid: "tidy-otter-4f2a".to_string(),
            pull_request_id: Uuid::new_v4(),
            environment_id: None,
            status: domain::status::BuildStatus::Deploying,
            status_message: None,
            sha: Some("abc123".to_string()),
            namespace: "env-tidy-otter-4f2a".to_string(),
            enable_full_yaml: true,
            is_static: false,
            webhooks_yaml: None,
            dependency_graph: None,
            dashboard_links: Json(vec![]),
            manifest: None,
            run_uuid: Some(Uuid::new_v4()),
            comment_runtime_env: Json(BTreeMap::new()),
            enabled_features: Json(vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let deployable = Deployable {
            id: Uuid::new_v4(),
            build_id: build.id,
            name: "api".to_string(),
            deploy_type: domain::status::DeployType::Github,
            branch_name: Some("main".to_string()),
            env: Json(BTreeMap::new()),
            init_env: Json(BTreeMap::new()),
            ports: Json(vec![]),
            public: true,
            grpc: false,
            capacity_type: None,
            helm: Some(Json(domain::entities::HelmSpec {
                chart: domain::entities::ChartSpec {
                    name: "org-web".to_string(),
                    values: vec!["replicaCount=2".to_string(), "ingress.host=stale".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            })),
            docker: None,
            codefresh: None,
            restore: None,
            deployment: None,
            keda_scale_to_zero: None,
            deployment_depends_on: Json(vec![]),
            build_uuid: build.uuid.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let deploy = Deploy {
            id: Uuid::new_v4(),
            uuid: "api-tidy-otter-4f2a".to_string(),
            build_id: build.id,
            deployable_id: deployable.id,
            service_id: None,
            status: domain::status::DeployStatus::Deploying,
            status_message: None,
            active: true,
            docker_image: Some("registry.example.com/lifecycle/api:abc123-d34d".to_string()),
            init_docker_image: None,
            public_url: None,
            internal_hostname: None,
            ip_address: None,
            port: None,
            branch_name: Some("main".to_string()),
            tag: None,
            sha: Some("abc123".to_string()),
            replica_count: None,
            env: Json(BTreeMap::new()),
            init_env: Json(BTreeMap::new()),
            build_logs: None,
            container_logs: None,
            run_uuid: None,
            yaml_config: None,
            is_running_latest: false,
            running_image: None,
            deploy_pipeline_id: None,
            build_output: None,
            build_job_name: None,
            github_deployment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut global = GlobalConfig::default();
        global.domain_defaults.http = "lifecycle.example.com".to_string();
        (build, deploy, deployable, global)
    }

    #[test]
    fn derived_values_win_over_chart_values() {
        let (build, deploy, deployable, global) = fixture();
        let values = build_values(&build, &deploy, &deployable, &global, &BTreeMap::new());

        // Chart order preserved, derived ingress host replaces the stale one.
        assert_eq!(values[0], "replicaCount=2");
        assert!(values.contains(&"ingress.host=api-tidy-otter-4f2a.lifecycle.example.com".to_string()));
        assert!(!values.contains(&"ingress.host=stale".to_string()));
        assert!(values.contains(&"fullnameOverride=api-tidy-otter-4f2a".to_string()));
        assert!(values.contains(&"commonLabels.lc__uuid=tidy-otter-4f2a".to_string()));
    }

    #[test]
    fn env_keys_double_underscores() {
        let (build, deploy, deployable, global) = fixture();
        let env = BTreeMap::from([("DATABASE_URL".to_string(), "postgres://db".to_string())]);
        let values = build_values(&build, &deploy, &deployable, &global, &env);
        assert!(values.contains(&"deployment.env.DATABASE__URL=postgres://db".to_string()));
    }

    #[test]
    fn grpc_whitelist_and_scale_to_zero_values() {
        let (build, deploy, mut deployable, mut global) = fixture();
        global.domain_defaults.grpc = Some("grpc.lifecycle.example.com".to_string());
        deployable.grpc = true;
        if let Some(helm) = deployable.helm.as_mut() {
            helm.0.override_default_ip_whitelist =
                vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()];
        }
        deployable.keda_scale_to_zero = Some(Json(domain::entities::KedaScaleToZero {
            enabled: true,
            min_replicas: Some(0),
            max_replicas: Some(3),
        }));

        let values = build_values(&build, &deploy, &deployable, &global, &BTreeMap::new());
        assert!(values.contains(&"grpc.enabled=true".to_string()));
        assert!(values.contains(
            &"grpc.host=api-tidy-otter-4f2a-grpc.grpc.lifecycle.example.com".to_string()
        ));
        assert!(values.contains(&"ingress.ipWhitelist={10.0.0.0/8,192.168.0.0/16}".to_string()));
        assert!(values.contains(&"autoscaling.scaleToZero=true".to_string()));
        assert!(values.contains(&"autoscaling.maxReplicas=3".to_string()));
    }

    #[test]
    fn disable_ingress_host_suppresses_the_derived_host() {
        let (build, deploy, mut deployable, global) = fixture();
        if let Some(helm) = deployable.helm.as_mut() {
            helm.0.disable_ingress_host = true;
        }
        let values = build_values(&build, &deploy, &deployable, &global, &BTreeMap::new());
        assert!(!values
            .iter()
            .any(|v| v.starts_with("ingress.host=api-tidy-otter-4f2a")));
    }

    #[test]
    fn static_builds_pin_the_node_pool() {
        let (mut build, deploy, deployable, global) = fixture();
        build.is_static = true;
        let values = build_values(&build, &deploy, &deployable, &global, &BTreeMap::new());
        assert!(values.contains(&"nodeSelector.lifecycle/node-pool=static".to_string()));
    }

    #[test]
    fn escape_env_key_doubles_each_underscore() {
        assert_eq!(escape_env_key("A_B_C"), "A__B__C");
        assert_eq!(escape_env_key("PLAIN"), "PLAIN");
    }

    #[tokio::test]
    async fn wait_for_release_returns_on_terminal_states() {
        let mut driver = MockReleaseDriver::new();
        driver
            .expect_status()
            .returning(|_, _| Ok(ReleaseState::Deployed));
        let state = wait_for_release(&driver, "api-x", "env-x", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(state, ReleaseState::Deployed);

        let mut driver = MockReleaseDriver::new();
        driver
            .expect_status()
            .returning(|_, _| Ok(ReleaseState::Failed));
        let state = wait_for_release(&driver, "api-x", "env-x", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(state, ReleaseState::Failed);
    }

    #[tokio::test]
    async fn wait_for_release_times_out_while_pending() {
        let mut driver = MockReleaseDriver::new();
        driver
            .expect_status()
            .returning(|_, _| Ok(ReleaseState::Pending));
        let state = wait_for_release(&driver, "api-x", "env-x", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(state, ReleaseState::Pending);
    }
}
