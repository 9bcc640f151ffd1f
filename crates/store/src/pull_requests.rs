use sqlx::types::Json;
use uuid::Uuid;

use domain::entities::{PullRequest, PullRequestPatch};
use domain::status::PullRequestStatus;
use domain::{DomainError, Result};

use crate::{map_db_err, BindValue, PatchBuilder, PgPool};

pub async fn upsert(
    pool: &PgPool,
    repository_id: Uuid,
    pr_number: i32,
    title: &str,
    status: PullRequestStatus,
    branch_name: &str,
    full_name: &str,
    latest_commit: Option<&str>,
    github_login: Option<&str>,
) -> Result<PullRequest> {
    sqlx::query_as::<_, PullRequest>(
        r#"
        INSERT INTO pull_requests (
            repository_id, pr_number, title, status, branch_name, full_name,
            latest_commit, github_login
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (repository_id, pr_number) DO UPDATE SET
            title = EXCLUDED.title,
            status = EXCLUDED.status,
            branch_name = EXCLUDED.branch_name,
            latest_commit = EXCLUDED.latest_commit,
            github_login = EXCLUDED.github_login,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(repository_id)
    .bind(pr_number)
    .bind(title)
    .bind(status.as_str())
    .bind(branch_name)
    .bind(full_name)
    .bind(latest_commit)
    .bind(github_login)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PullRequest>> {
    sqlx::query_as::<_, PullRequest>("SELECT * FROM pull_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<PullRequest> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| DomainError::not_found("pull_request", id))
}

pub async fn find_by_number(
    pool: &PgPool,
    repository_id: Uuid,
    pr_number: i32,
) -> Result<Option<PullRequest>> {
    sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests WHERE repository_id = $1 AND pr_number = $2",
    )
    .bind(repository_id)
    .bind(pr_number)
    .fetch_optional(pool)
    .await
    .map_err(map_db_err)
}

pub async fn patch(pool: &PgPool, id: Uuid, patch: PullRequestPatch) -> Result<PullRequest> {
    let mut builder = PatchBuilder::new(2);

    if let Some(title) = patch.title {
        builder.set("title", BindValue::Text(Some(title)));
    }
    if let Some(status) = patch.status {
        builder.set("status", BindValue::Text(Some(status.as_str().to_string())));
    }
    if let Some(branch_name) = patch.branch_name {
        builder.set("branch_name", BindValue::Text(Some(branch_name)));
    }
    if let Some(latest_commit) = patch.latest_commit {
        builder.set("latest_commit", BindValue::Text(Some(latest_commit)));
    }
    if let Some(github_login) = patch.github_login {
        builder.set("github_login", BindValue::Text(Some(github_login)));
    }
    if let Some(comment_id) = patch.comment_id {
        builder.set("comment_id", BindValue::BigInt(Some(comment_id)));
    }
    if let Some(status_comment_id) = patch.status_comment_id {
        builder.set("status_comment_id", BindValue::BigInt(Some(status_comment_id)));
    }
    if let Some(etag) = patch.etag {
        builder.set("etag", BindValue::Text(Some(etag)));
    }
    if let Some(labels) = patch.labels {
        builder.set_json("labels", &labels);
    }
    if let Some(deploy_on_update) = patch.deploy_on_update {
        builder.set("deploy_on_update", BindValue::Bool(deploy_on_update));
    }

    if builder.is_empty() {
        return get_by_id(pool, id).await;
    }

    let sql = format!("UPDATE pull_requests SET {} WHERE id = $1", builder.clause());
    let query = builder.bind_all(sqlx::query(&sql).bind(id));
    let result = query.execute(pool).await.map_err(map_db_err)?;
    if result.rows_affected() == 0 {
        return Err(DomainError::not_found("pull_request", id));
    }
    get_by_id(pool, id).await
}

/// Replace the stored label list (labels are replacing, not additive).
pub async fn set_labels(pool: &PgPool, id: Uuid, labels: &[String]) -> Result<()> {
    sqlx::query("UPDATE pull_requests SET labels = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(Json(labels))
        .execute(pool)
        .await
        .map_err(map_db_err)?;
    Ok(())
}
