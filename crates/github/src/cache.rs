//! ETag/Last-Modified response cache on redis.
//!
//! Keys are `req_cache:<endpoint>`; entries carry the validators plus the
//! response body and live for a fixed TTL. A 304 from the forge serves the
//! cached body and refreshes the TTL.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use domain::{DomainError, Result};

const KEY_PREFIX: &str = "req_cache:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
pub struct RequestCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RequestCache {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        RequestCache { conn, ttl_secs }
    }

    fn key(endpoint: &str) -> String {
        format!("{KEY_PREFIX}{endpoint}")
    }

    pub async fn get(&self, endpoint: &str) -> Result<Option<CachedResponse>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key(endpoint))
            .await
            .map_err(|e| DomainError::Transient(format!("cache read: {e}")))?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(entry) => Ok(Some(entry)),
                // A corrupt entry is equivalent to a miss.
                Err(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub async fn put(&self, endpoint: &str, entry: &CachedResponse) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(entry)
            .map_err(|e| DomainError::Internal(format!("cache encode: {e}")))?;
        conn.set_ex::<_, _, ()>(Self::key(endpoint), json, self.ttl_secs)
            .await
            .map_err(|e| DomainError::Transient(format!("cache write: {e}")))?;
        Ok(())
    }

    /// Refresh the TTL on a 304 without rewriting the entry.
    pub async fn touch(&self, endpoint: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(Self::key(endpoint), self.ttl_secs as i64)
            .await
            .map_err(|e| DomainError::Transient(format!("cache touch: {e}")))?;
        Ok(())
    }

    pub async fn invalidate(&self, endpoint: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(endpoint))
            .await
            .map_err(|e| DomainError::Transient(format!("cache delete: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_endpoint_verbatim() {
        assert_eq!(
            RequestCache::key("/repos/org/api/pulls/1"),
            "req_cache:/repos/org/api/pulls/1"
        );
    }

    #[test]
    fn entries_round_trip_with_validators() {
        let entry = CachedResponse {
            etag: Some("W/\"abc\"".to_string()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            body: serde_json::json!({ "number": 1, "title": "t" }),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let decoded: CachedResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.etag.as_deref(), Some("W/\"abc\""));
        assert_eq!(decoded.body["number"], 1);
    }
}
