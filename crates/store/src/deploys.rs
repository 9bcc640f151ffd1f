use sqlx::types::Json;
use uuid::Uuid;

use domain::entities::{Deploy, DeployPatch};
use domain::status::DeployStatus;
use domain::{DomainError, Result};

use crate::{map_db_err, BindValue, PatchBuilder, PgPool};

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Deploy>> {
    sqlx::query_as::<_, Deploy>("SELECT * FROM deploys WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Deploy> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| DomainError::not_found("deploy", id))
}

pub async fn find_by_uuid(pool: &PgPool, uuid: &str) -> Result<Option<Deploy>> {
    sqlx::query_as::<_, Deploy>("SELECT * FROM deploys WHERE uuid = $1")
        .bind(uuid)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn list_for_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<Deploy>> {
    sqlx::query_as::<_, Deploy>(
        "SELECT * FROM deploys WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}

pub async fn list_active_for_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<Deploy>> {
    sqlx::query_as::<_, Deploy>(
        "SELECT * FROM deploys WHERE build_id = $1 AND active ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}

/// Insert-or-update keyed by `(build_id, deployable_id)`; there is at most
/// one deploy per deployable per build.
pub async fn upsert(
    pool: &PgPool,
    uuid: &str,
    build_id: Uuid,
    deployable_id: Uuid,
    active: bool,
    branch_name: Option<&str>,
    sha: Option<&str>,
    run_uuid: Uuid,
) -> Result<Deploy> {
    sqlx::query_as::<_, Deploy>(
        r#"
        INSERT INTO deploys (uuid, build_id, deployable_id, active, branch_name, sha, run_uuid, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued')
        ON CONFLICT (build_id, deployable_id) DO UPDATE
            SET active = EXCLUDED.active,
                branch_name = EXCLUDED.branch_name,
                sha = EXCLUDED.sha,
                run_uuid = EXCLUDED.run_uuid,
                status = 'queued',
                status_message = NULL,
                updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(uuid)
    .bind(build_id)
    .bind(deployable_id)
    .bind(active)
    .bind(branch_name)
    .bind(sha)
    .bind(run_uuid)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn reload(pool: &PgPool, deploy: &Deploy) -> Result<Deploy> {
    get_by_id(pool, deploy.id).await
}

pub async fn patch(pool: &PgPool, id: Uuid, patch: DeployPatch) -> Result<Deploy> {
    let mut builder = PatchBuilder::new(2);

    if let Some(status) = patch.status {
        builder.set("status", BindValue::Text(Some(status.as_str().to_string())));
    }
    if let Some(message) = patch.status_message {
        builder.set("status_message", BindValue::Text(message));
    }
    if let Some(active) = patch.active {
        builder.set("active", BindValue::Bool(active));
    }
    if let Some(docker_image) = patch.docker_image {
        builder.set("docker_image", BindValue::Text(docker_image));
    }
    if let Some(init_docker_image) = patch.init_docker_image {
        builder.set("init_docker_image", BindValue::Text(init_docker_image));
    }
    if let Some(public_url) = patch.public_url {
        builder.set("public_url", BindValue::Text(public_url));
    }
    if let Some(internal_hostname) = patch.internal_hostname {
        builder.set("internal_hostname", BindValue::Text(internal_hostname));
    }
    if let Some(ip_address) = patch.ip_address {
        builder.set("ip_address", BindValue::Text(ip_address));
    }
    if let Some(port) = patch.port {
        builder.set("port", BindValue::Int(port));
    }
    if let Some(branch_name) = patch.branch_name {
        builder.set("branch_name", BindValue::Text(branch_name));
    }
    if let Some(tag) = patch.tag {
        builder.set("tag", BindValue::Text(tag));
    }
    if let Some(sha) = patch.sha {
        builder.set("sha", BindValue::Text(sha));
    }
    if let Some(replica_count) = patch.replica_count {
        builder.set("replica_count", BindValue::Int(replica_count));
    }
    if let Some(env) = patch.env {
        builder.set_json("env", &env);
    }
    if let Some(init_env) = patch.init_env {
        builder.set_json("init_env", &init_env);
    }
    if let Some(build_logs) = patch.build_logs {
        builder.set("build_logs", BindValue::Text(build_logs));
    }
    if let Some(container_logs) = patch.container_logs {
        builder.set("container_logs", BindValue::Text(container_logs));
    }
    if let Some(run_uuid) = patch.run_uuid {
        builder.set("run_uuid", BindValue::Uuid(run_uuid));
    }
    if let Some(yaml_config) = patch.yaml_config {
        builder.set("yaml_config", BindValue::Text(yaml_config));
    }
    if let Some(is_running_latest) = patch.is_running_latest {
        builder.set("is_running_latest", BindValue::Bool(is_running_latest));
    }
    if let Some(running_image) = patch.running_image {
        builder.set("running_image", BindValue::Text(running_image));
    }
    if let Some(deploy_pipeline_id) = patch.deploy_pipeline_id {
        builder.set("deploy_pipeline_id", BindValue::Text(deploy_pipeline_id));
    }
    if let Some(build_output) = patch.build_output {
        builder.set("build_output", BindValue::Text(build_output));
    }
    if let Some(build_job_name) = patch.build_job_name {
        builder.set("build_job_name", BindValue::Text(build_job_name));
    }
    if let Some(github_deployment_id) = patch.github_deployment_id {
        builder.set("github_deployment_id", BindValue::BigInt(github_deployment_id));
    }

    if builder.is_empty() {
        return get_by_id(pool, id).await;
    }

    let sql = format!("UPDATE deploys SET {} WHERE id = $1", builder.clause());
    let query = builder.bind_all(sqlx::query(&sql).bind(id));
    let result = query.execute(pool).await.map_err(map_db_err)?;
    if result.rows_affected() == 0 {
        return Err(DomainError::not_found("deploy", id));
    }
    get_by_id(pool, id).await
}

/// Guarded status transition, mirroring `builds::transition_status`.
pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    next: DeployStatus,
    message: Option<String>,
) -> Result<Deploy> {
    let current = get_by_id(pool, id).await?;
    if !current.status.can_transition_to(next) {
        return Err(DomainError::InvalidTransition {
            entity: "deploy".to_string(),
            from: current.status.to_string(),
            to: next.to_string(),
        });
    }

    let mut update = DeployPatch::status(next);
    if message.is_some() {
        update.status_message = Some(message);
    }
    patch(pool, id, update).await
}

/// Statuses of all active sibling deploys, for build-level aggregation.
pub async fn sibling_statuses(pool: &PgPool, build_id: Uuid) -> Result<Vec<(String, DeployStatus)>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        name: String,
        status: String,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT da.name AS name, d.status AS status
        FROM deploys d
        JOIN deployables da ON da.id = d.deployable_id
        WHERE d.build_id = $1 AND d.active
        ORDER BY d.created_at ASC
        "#,
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)?;

    rows.into_iter()
        .map(|row| Ok((row.name, row.status.parse()?)))
        .collect()
}

/// Used by teardown: flip every deploy of a build in one statement.
pub async fn mark_all_for_build(
    pool: &PgPool,
    build_id: Uuid,
    status: DeployStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE deploys SET status = $2, updated_at = NOW() WHERE build_id = $1",
    )
    .bind(build_id)
    .bind(status.as_str())
    .execute(pool)
    .await
    .map_err(map_db_err)?;
    Ok(result.rows_affected())
}

/// JSONB env replacement without touching other columns; kept separate from
/// `patch` because resolve rewrites env maps wholesale on every run.
pub async fn replace_env(
    pool: &PgPool,
    id: Uuid,
    env: &std::collections::BTreeMap<String, String>,
    init_env: &std::collections::BTreeMap<String, String>,
) -> Result<()> {
    sqlx::query("UPDATE deploys SET env = $2, init_env = $3, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(Json(env))
        .bind(Json(init_env))
        .execute(pool)
        .await
        .map_err(map_db_err)?;
    Ok(())
}
