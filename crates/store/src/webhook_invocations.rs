use sqlx::types::Json;
use uuid::Uuid;

use domain::entities::WebhookInvocation;
use domain::status::WebhookInvocationStatus;
use domain::{DomainError, Result};

use crate::{map_db_err, PgPool};

pub async fn create(
    pool: &PgPool,
    build_id: Uuid,
    run_uuid: Uuid,
    name: &str,
    webhook_type: &str,
    state: &str,
    yaml_config: Option<&str>,
) -> Result<WebhookInvocation> {
    sqlx::query_as::<_, WebhookInvocation>(
        r#"
        INSERT INTO webhook_invocations (build_id, run_uuid, name, webhook_type, state, yaml_config)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(build_id)
    .bind(run_uuid)
    .bind(name)
    .bind(webhook_type)
    .bind(state)
    .bind(yaml_config)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn complete(
    pool: &PgPool,
    id: Uuid,
    status: WebhookInvocationStatus,
    metadata: serde_json::Value,
) -> Result<WebhookInvocation> {
    sqlx::query_as::<_, WebhookInvocation>(
        r#"
        UPDATE webhook_invocations
        SET status = $2, metadata = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(Json(metadata))
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn list_for_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<WebhookInvocation>> {
    sqlx::query_as::<_, WebhookInvocation>(
        "SELECT * FROM webhook_invocations WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}

/// At-least-once guard: has this webhook already been recorded for this
/// run and state?
pub async fn exists(
    pool: &PgPool,
    build_id: Uuid,
    run_uuid: Uuid,
    name: &str,
    state: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM webhook_invocations
        WHERE build_id = $1 AND run_uuid = $2 AND name = $3 AND state = $4
        "#,
    )
    .bind(build_id)
    .bind(run_uuid)
    .bind(name)
    .bind(state)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)?;
    Ok(count > 0)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<WebhookInvocation> {
    sqlx::query_as::<_, WebhookInvocation>("SELECT * FROM webhook_invocations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| DomainError::not_found("webhook_invocation", id))
}
