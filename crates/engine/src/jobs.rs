//! Short-lived Kubernetes batch jobs.
//!
//! One runner submits a Job manifest, follows it to completion, and hands
//! back combined pod logs. The image builder's in-cluster back-end and the
//! docker/command webhooks all go through here.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use domain::{DomainError, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One container of a job manifest.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    fn to_manifest(&self) -> serde_json::Value {
        let env: Vec<serde_json::Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let mut container = json!({
            "name": self.name,
            "image": self.image,
            "env": env,
        });
        if let Some(command) = &self.command {
            container["command"] = json!(command);
        }
        if let Some(args) = &self.args {
            container["args"] = json!(args);
        }
        container
    }
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub init_containers: Vec<ContainerSpec>,
    pub containers: Vec<ContainerSpec>,
    /// TTL after finish; static environments get a long one.
    pub ttl_seconds: Option<i64>,
    /// Schedule onto the dedicated static-environment node pool.
    pub static_node_pool: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_name: String,
    pub success: bool,
    pub logs: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, request: &JobRequest) -> Result<JobOutcome>;
}

pub struct KubeJobRunner {
    client: Client,
}

impl KubeJobRunner {
    pub fn new(client: Client) -> Self {
        KubeJobRunner { client }
    }

    fn manifest(request: &JobRequest) -> Result<Job> {
        let init_containers: Vec<_> = request
            .init_containers
            .iter()
            .map(ContainerSpec::to_manifest)
            .collect();
        let containers: Vec<_> = request.containers.iter().map(ContainerSpec::to_manifest).collect();

        let mut pod_spec = json!({
            "restartPolicy": "Never",
            "containers": containers,
        });
        if !init_containers.is_empty() {
            pod_spec["initContainers"] = json!(init_containers);
        }
        if request.static_node_pool {
            pod_spec["nodeSelector"] = json!({ "lifecycle/node-pool": "static" });
            pod_spec["tolerations"] = json!([{
                "key": "lifecycle/static",
                "operator": "Exists",
                "effect": "NoSchedule",
            }]);
        }

        let mut spec = json!({
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": request.labels },
                "spec": pod_spec,
            },
        });
        if let Some(ttl) = request.ttl_seconds {
            spec["ttlSecondsAfterFinished"] = json!(ttl);
        }

        serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": request.name,
                "namespace": request.namespace,
                "labels": request.labels,
            },
            "spec": spec,
        }))
        .map_err(|e| DomainError::Internal(format!("job manifest: {e}")))
    }

    async fn collect_logs(&self, namespace: &str, job_name: &str) -> String {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("job-name={job_name}"));
        let mut combined = String::new();
        match pods.list(&params).await {
            Ok(list) => {
                for pod in list {
                    let Some(pod_name) = pod.metadata.name else {
                        continue;
                    };
                    match pods.logs(&pod_name, &Default::default()).await {
                        Ok(logs) => {
                            combined.push_str(&logs);
                            combined.push('\n');
                        }
                        Err(e) => warn!(pod = %pod_name, "log fetch failed: {e}"),
                    }
                }
            }
            Err(e) => warn!(job = %job_name, "pod list failed: {e}"),
        }
        combined
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn run_job(&self, request: &JobRequest) -> Result<JobOutcome> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &request.namespace);
        let manifest = Self::manifest(request)?;

        jobs.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref response) if response.code == 409 => {
                    DomainError::Conflict(format!("job {} already exists", request.name))
                }
                other => DomainError::Transient(format!("job create {}: {other}", request.name)),
            })?;
        info!(job = %request.name, namespace = %request.namespace, "batch job submitted");

        let deadline = tokio::time::Instant::now() + request.timeout;
        let success = loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let status = jobs
                .get_status(&request.name)
                .await
                .map_err(|e| DomainError::Transient(format!("job status {}: {e}", request.name)))?
                .status
                .unwrap_or_default();

            if status.succeeded.unwrap_or(0) > 0 {
                break true;
            }
            if status.failed.unwrap_or(0) > 0 {
                break false;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(job = %request.name, "batch job timed out");
                break false;
            }
        };

        let logs = self.collect_logs(&request.namespace, &request.name).await;
        Ok(JobOutcome {
            job_name: request.name.clone(),
            success,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            name: "build-api-tidy-otter".to_string(),
            namespace: "env-tidy-otter".to_string(),
            labels: BTreeMap::from([("lc-service".to_string(), "api".to_string())]),
            init_containers: vec![],
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                image: "alpine:3".to_string(),
                command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                args: Some(vec!["echo done".to_string()]),
                env: BTreeMap::from([("FOO".to_string(), "bar".to_string())]),
            }],
            ttl_seconds: Some(86400),
            static_node_pool: true,
            timeout: Duration::from_secs(600),
        }
    }

    #[test]
    fn manifest_carries_labels_ttl_and_static_scheduling() {
        let job = KubeJobRunner::manifest(&request()).unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.ttl_seconds_after_finished, Some(86400));
        assert_eq!(spec.backoff_limit, Some(0));

        let pod_spec = spec.template.spec.unwrap();
        assert!(pod_spec.node_selector.is_some());
        assert!(pod_spec.tolerations.is_some());
        assert_eq!(pod_spec.containers[0].name, "main");
        let env = pod_spec.containers[0].env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "FOO"));

        assert_eq!(
            job.metadata.labels.unwrap().get("lc-service"),
            Some(&"api".to_string())
        );
    }
}
