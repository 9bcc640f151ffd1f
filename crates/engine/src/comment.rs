//! PR status comment rendering.
//!
//! One comment per PR, edited in place: a status header, a per-service
//! table, and the user-editable selection block the comment parser reads
//! back on the next resolve.

use domain::entities::{Build, Deploy, Deployable};
use domain::status::BuildStatus;
use resolver::comment::{CommentState, ServiceSelection};

fn status_emoji(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Deployed => "✅",
        BuildStatus::Error | BuildStatus::ConfigError => "❌",
        BuildStatus::TearingDown | BuildStatus::TornDown => "🗑️",
        _ => "🔄",
    }
}

pub fn render_status_comment(
    build: &Build,
    deploys: &[Deploy],
    deployables: &[Deployable],
) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "## Lifecycle environment `{}` {}\n\n",
        build.uuid,
        status_emoji(build.status)
    ));
    body.push_str(&format!("**Status:** {}\n", build.status));
    if let Some(message) = &build.status_message {
        body.push_str(&format!("> {message}\n"));
    }
    body.push('\n');

    if !deploys.is_empty() {
        body.push_str("| Service | Status | URL |\n|---|---|---|\n");
        for deploy in deploys {
            let name = deployables
                .iter()
                .find(|da| da.id == deploy.deployable_id)
                .map(|da| da.name.as_str())
                .unwrap_or("?");
            let url = deploy
                .public_url
                .as_deref()
                .map(|u| format!("[{u}]({u})"))
                .unwrap_or_else(|| "-".to_string());
            let status = if deploy.active {
                deploy.status.to_string()
            } else {
                "inactive".to_string()
            };
            body.push_str(&format!("| {name} | {status} | {url} |\n"));
        }
        body.push('\n');
    }

    // The editable selection block, seeded from the current deploys.
    let mut state = CommentState::default();
    for deploy in deploys {
        let Some(deployable) = deployables.iter().find(|da| da.id == deploy.deployable_id)
        else {
            continue;
        };
        state.services.insert(
            deployable.name.clone(),
            ServiceSelection {
                checked: deploy.active,
                value: deploy
                    .branch_name
                    .clone()
                    .unwrap_or_else(|| "main".to_string()),
                vanity_url: None,
            },
        );
    }
    for (key, value) in &build.comment_runtime_env.0 {
        state.runtime_env.insert(key.clone(), value.clone());
    }
    body.push_str(&resolver::comment::render(&state));
    body.push('\n');
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn fixture() -> (Build, Vec<Deploy>, Vec<Deployable>) {
        let build_id = Uuid::new_v4();
        let build = Build {
            id: build_id,
            uuid: "tidy-otter-4f2a".to_string(),
            pull_request_id: Uuid::new_v4(),
            environment_id: None,
            status: BuildStatus::Deployed,
            status_message: None,
            sha: Some("abc123".to_string()),
            namespace: "env-tidy-otter-4f2a".to_string(),
            enable_full_yaml: true,
            is_static: false,
            webhooks_yaml: None,
            dependency_graph: None,
            dashboard_links: Json(vec![]),
            manifest: None,
            run_uuid: None,
            comment_runtime_env: Json(BTreeMap::from([(
                "LOG_LEVEL".to_string(),
                "debug".to_string(),
            )])),
            enabled_features: Json(vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let deployable_id = Uuid::new_v4();
        let deployable = Deployable {
            id: deployable_id,
            build_id,
            name: "api".to_string(),
            deploy_type: domain::status::DeployType::Github,
            branch_name: Some("main".to_string()),
            env: Json(BTreeMap::new()),
            init_env: Json(BTreeMap::new()),
            ports: Json(vec![]),
            public: true,
            grpc: false,
            capacity_type: None,
            helm: None,
            docker: None,
            codefresh: None,
            restore: None,
            deployment: None,
            keda_scale_to_zero: None,
            deployment_depends_on: Json(vec![]),
            build_uuid: "tidy-otter-4f2a".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let deploy = Deploy {
            id: Uuid::new_v4(),
            uuid: "api-tidy-otter-4f2a".to_string(),
            build_id,
            deployable_id,
            service_id: None,
            status: domain::status::DeployStatus::Ready,
            status_message: None,
            active: true,
            docker_image: None,
            init_docker_image: None,
            public_url: Some("https://api-tidy-otter-4f2a.lifecycle.example.com".to_string()),
            internal_hostname: Some("api-tidy-otter-4f2a".to_string()),
            ip_address: None,
            port: Some(8080),
            branch_name: Some("feature/login".to_string()),
            tag: None,
            sha: Some("abc123".to_string()),
            replica_count: Some(1),
            env: Json(BTreeMap::new()),
            init_env: Json(BTreeMap::new()),
            build_logs: None,
            container_logs: None,
            run_uuid: None,
            yaml_config: None,
            is_running_latest: true,
            running_image: None,
            deploy_pipeline_id: None,
            build_output: None,
            build_job_name: None,
            github_deployment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        (build, vec![deploy], vec![deployable])
    }

    #[test]
    fn comment_round_trips_through_the_parser() {
        let (build, deploys, deployables) = fixture();
        let body = render_status_comment(&build, &deploys, &deployables);

        let state = resolver::comment::parse(&body);
        assert!(state.services["api"].checked);
        assert_eq!(state.services["api"].value, "feature/login");
        assert_eq!(state.runtime_env["LOG_LEVEL"], "debug");
    }

    #[test]
    fn comment_names_the_build_and_service() {
        let (build, deploys, deployables) = fixture();
        let body = render_status_comment(&build, &deploys, &deployables);
        assert!(body.contains("tidy-otter-4f2a"));
        assert!(body.contains("| api | ready |"));
        assert!(body.contains("https://api-tidy-otter-4f2a.lifecycle.example.com"));
    }
}
