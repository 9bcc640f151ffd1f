use uuid::Uuid;

use domain::entities::Repository;
use domain::{DomainError, Result};

use crate::{map_db_err, PgPool};

/// Create on first sighting; an existing row just refreshes its metadata.
pub async fn upsert(
    pool: &PgPool,
    owner_id: i64,
    repo_id: i64,
    installation_id: i64,
    full_name: &str,
    html_url: &str,
) -> Result<Repository> {
    sqlx::query_as::<_, Repository>(
        r#"
        INSERT INTO repositories (owner_id, repo_id, installation_id, full_name, html_url)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (repo_id) DO UPDATE SET
            installation_id = EXCLUDED.installation_id,
            full_name = EXCLUDED.full_name,
            html_url = EXCLUDED.html_url,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(repo_id)
    .bind(installation_id)
    .bind(full_name)
    .bind(html_url)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Repository>> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Repository> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| DomainError::not_found("repository", id))
}

pub async fn find_by_full_name(pool: &PgPool, full_name: &str) -> Result<Option<Repository>> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE full_name = $1")
        .bind(full_name)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn set_default_environment(
    pool: &PgPool,
    id: Uuid,
    default_env_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE repositories SET default_env_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(default_env_id)
    .execute(pool)
    .await
    .map_err(map_db_err)?;
    Ok(())
}
