//! Distributed locks: `SET key token NX PX ttl`, released only by the
//! holder (token-checked delete). Serialises all writes to a build or
//! deploy across worker processes.

use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use uuid::Uuid;

use domain::{DomainError, Result};

/// Compare-and-delete; releasing someone else's lock is a no-op.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct LockManager {
    conn: ConnectionManager,
}

impl LockManager {
    pub fn new(conn: ConnectionManager) -> Self {
        LockManager { conn }
    }

    /// Try to take the lock; `None` when another holder has it.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::Transient(format!("lock acquire {key}: {e}")))?;

        Ok(acquired.map(|_| LockGuard {
            conn: self.conn.clone(),
            key: key.to_string(),
            token,
        }))
    }

    /// Acquire with bounded retries; used where callers must serialise
    /// rather than coalesce.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        retry_every: Duration,
        max_wait: Duration,
    ) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(guard) = self.try_acquire(key, ttl).await? {
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DomainError::Transient(format!(
                    "lock {key}: not acquired within {max_wait:?}"
                )));
            }
            tokio::time::sleep(retry_every).await;
        }
    }
}

/// Held lock; release explicitly or let the TTL expire. Dropping without
/// release leaves the TTL as the safety net, which is what we want when a
/// worker dies mid-job.
pub struct LockGuard {
    conn: ConnectionManager,
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(self) -> Result<()> {
        let mut conn = self.conn.clone();
        Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| DomainError::Transient(format!("lock release {}: {e}", self.key)))?;
        Ok(())
    }
}

/// Lock key conventions used by the pipeline.
pub mod keys {
    use uuid::Uuid;

    pub fn build_resolve(build_id: Uuid) -> String {
        format!("build:{build_id}:resolve")
    }

    pub fn deploy_build(deploy_id: Uuid) -> String {
        format!("deploy:{deploy_id}:build")
    }

    pub fn deploy_deploy(deploy_id: Uuid) -> String {
        format!("deploy:{deploy_id}:deploy")
    }

    pub fn deploy_mutation(deploy_id: Uuid) -> String {
        format!("deploy:{deploy_id}:mut")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conventions_are_stable() {
        let id = Uuid::nil();
        assert_eq!(
            keys::build_resolve(id),
            "build:00000000-0000-0000-0000-000000000000:resolve"
        );
        assert_eq!(
            keys::deploy_build(id),
            "deploy:00000000-0000-0000-0000-000000000000:build"
        );
    }
}
