use uuid::Uuid;

use domain::entities::Environment;
use domain::{DomainError, Result};

use crate::{map_db_err, PgPool};

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Environment>> {
    sqlx::query_as::<_, Environment>("SELECT * FROM environments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Environment>> {
    sqlx::query_as::<_, Environment>("SELECT * FROM environments WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)
}

pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Environment> {
    find_by_name(pool, name)
        .await?
        .ok_or_else(|| DomainError::not_found("environment", name))
}

pub async fn create(
    pool: &PgPool,
    name: &str,
    uuid: &str,
    classic_mode_only: bool,
    enable_full_yaml: bool,
    auto_deploy: bool,
) -> Result<Environment> {
    sqlx::query_as::<_, Environment>(
        r#"
        INSERT INTO environments (name, uuid, classic_mode_only, enable_full_yaml, auto_deploy)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(uuid)
    .bind(classic_mode_only)
    .bind(enable_full_yaml)
    .bind(auto_deploy)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}
