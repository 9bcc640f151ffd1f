//! Process-wide forge client.
//!
//! All requests share one token bucket: a semaphore bounds concurrent
//! outstanding calls and a sliding window bounds the request rate. GET
//! responses flow through the redis ETag cache.

use std::collections::VecDeque;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use reqwest::{Method, StatusCode};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Duration, Instant};

use domain::{DomainError, Result};

use crate::auth::AppAuth;
use crate::cache::{CachedResponse, RequestCache};

#[derive(Debug, Clone, Copy)]
pub struct ClientLimits {
    /// Concurrent outstanding requests.
    pub max_concurrent: u32,
    /// Requests per window.
    pub max_per_window: u32,
    pub window: Duration,
}

impl Default for ClientLimits {
    fn default() -> Self {
        ClientLimits {
            max_concurrent: 100,
            max_per_window: 40,
            window: Duration::from_secs(10),
        }
    }
}

pub struct ForgeClient {
    auth: Arc<AppAuth>,
    cache: RequestCache,
    http: reqwest::Client,
    api_base: String,
    permits: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
    limits: ClientLimits,
}

impl ForgeClient {
    pub fn new(
        auth: Arc<AppAuth>,
        cache: RequestCache,
        api_base: &str,
        limits: ClientLimits,
    ) -> Self {
        ForgeClient {
            auth,
            cache,
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            permits: Arc::new(Semaphore::new(limits.max_concurrent as usize)),
            window: Mutex::new(VecDeque::new()),
            limits,
        }
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Wait for a rate-limit slot: a concurrency permit plus a free place
    /// in the sliding window.
    async fn throttle(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DomainError::Internal("client closed".to_string()))?;

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .map(|t| now.duration_since(*t) >= self.limits.window)
                    .unwrap_or(false)
                {
                    window.pop_front();
                }
                if (window.len() as u32) < self.limits.max_per_window {
                    window.push_back(now);
                    None
                } else {
                    window
                        .front()
                        .map(|oldest| self.limits.window - now.duration_since(*oldest))
                }
            };
            match wait {
                None => return Ok(permit),
                Some(delay) => sleep(delay).await,
            }
        }
    }

    /// One authenticated request. GETs consult and maintain the ETag cache;
    /// a 304 serves the cached body.
    pub async fn request(
        &self,
        installation_id: i64,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let _permit = self.throttle().await?;
        let token = self.auth.installation_token(installation_id).await?;
        let url = format!("{}{path}", self.api_base);

        let cached = if method == Method::GET {
            self.cache.get(path).await.unwrap_or(None)
        } else {
            None
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("lifecycle"));
        if let Some(entry) = &cached {
            if let Some(etag) = entry.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(IF_NONE_MATCH, etag);
            }
            if let Some(lm) = entry
                .last_modified
                .as_deref()
                .and_then(|v| HeaderValue::from_str(v).ok())
            {
                headers.insert(IF_MODIFIED_SINCE, lm);
            }
        }

        let mut request = self
            .http
            .request(method.clone(), &url)
            .headers(headers)
            .bearer_auth(&token);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::Transient(format!("{method} {path}: {e}")))?;
        let status = response.status();

        match status {
            StatusCode::NOT_MODIFIED => {
                let entry = cached.ok_or_else(|| {
                    DomainError::Transient(format!("{path}: 304 without cache entry"))
                })?;
                self.cache.touch(path).await.ok();
                Ok(entry.body)
            }
            s if s.is_success() => {
                let etag = header_string(&response, "etag");
                let last_modified = header_string(&response, "last-modified");
                let body = if s == StatusCode::NO_CONTENT {
                    serde_json::Value::Null
                } else {
                    response
                        .json()
                        .await
                        .unwrap_or(serde_json::Value::Null)
                };
                if method == Method::GET && (etag.is_some() || last_modified.is_some()) {
                    let entry = CachedResponse {
                        etag,
                        last_modified,
                        body: body.clone(),
                    };
                    self.cache.put(path, &entry).await.ok();
                }
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(DomainError::not_found("forge resource", path)),
            StatusCode::UNAUTHORIZED => {
                // Token may have expired server-side; re-auth on retry.
                self.auth.invalidate(installation_id);
                Err(DomainError::Transient(format!("{path}: 401, token invalidated")))
            }
            s if s.is_server_error() => {
                Err(DomainError::Transient(format!("{method} {path}: {s}")))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(DomainError::Permanent(format!("{method} {path}: {s} {body}")))
            }
        }
    }

    /// Typed convenience wrapper.
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        installation_id: i64,
        path: &str,
    ) -> Result<T> {
        let body = self
            .request(installation_id, Method::GET, path, None)
            .await?;
        serde_json::from_value(body)
            .map_err(|e| DomainError::Transient(format!("GET {path}: decode: {e}")))
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
