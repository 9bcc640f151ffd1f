//! Redis-backed cache of the assembled global configuration.
//!
//! The REST layer exposes GET (read-through) and PUT (force refresh from
//! the store); workers read through the cache so config edits propagate
//! within the TTL without a restart.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use domain::entities::GlobalConfig;
use domain::{DomainError, Result};
use store::PgPool;

const CACHE_KEY: &str = "global_config:cache";
const CACHE_TTL_SECS: u64 = 300;

#[derive(Clone)]
pub struct GlobalConfigCache {
    pool: PgPool,
    conn: ConnectionManager,
}

impl GlobalConfigCache {
    pub fn new(pool: PgPool, conn: ConnectionManager) -> Self {
        GlobalConfigCache { pool, conn }
    }

    /// Read-through fetch.
    pub async fn get(&self) -> Result<GlobalConfig> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn
            .get(CACHE_KEY)
            .await
            .map_err(|e| DomainError::Transient(format!("config cache read: {e}")))?;
        if let Some(json) = cached {
            if let Ok(config) = serde_json::from_str(&json) {
                return Ok(config);
            }
        }
        self.refresh().await
    }

    /// Reload from the store and rewrite the cache entry.
    pub async fn refresh(&self) -> Result<GlobalConfig> {
        let config = store::global_config::fetch(&self.pool).await?;
        let json = serde_json::to_string(&config)
            .map_err(|e| DomainError::Internal(format!("config encode: {e}")))?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(CACHE_KEY, json, CACHE_TTL_SECS)
            .await
            .map_err(|e| DomainError::Transient(format!("config cache write: {e}")))?;
        Ok(config)
    }
}
