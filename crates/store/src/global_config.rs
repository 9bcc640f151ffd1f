use sqlx::types::Json;

use domain::entities::{GlobalConfig, GlobalConfigEntry};
use domain::Result;

use crate::{map_db_err, PgPool};

pub async fn list(pool: &PgPool) -> Result<Vec<GlobalConfigEntry>> {
    sqlx::query_as::<_, GlobalConfigEntry>("SELECT * FROM global_config ORDER BY key ASC")
        .fetch_all(pool)
        .await
        .map_err(map_db_err)
}

/// Assembled view over all rows.
pub async fn fetch(pool: &PgPool) -> Result<GlobalConfig> {
    let entries = list(pool).await?;
    Ok(GlobalConfig::from_entries(&entries))
}

pub async fn upsert(
    pool: &PgPool,
    key: &str,
    config: serde_json::Value,
) -> Result<GlobalConfigEntry> {
    sqlx::query_as::<_, GlobalConfigEntry>(
        r#"
        INSERT INTO global_config (key, config)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(key)
    .bind(Json(config))
    .fetch_one(pool)
    .await
    .map_err(map_db_err)
}
