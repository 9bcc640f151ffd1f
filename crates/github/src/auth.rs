//! GitHub App authentication.
//!
//! The app signs a short-lived RS256 JWT with its private key, then trades
//! it for per-installation access tokens. Installation tokens are cached
//! until shortly before the forge-provided expiry.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use domain::{DomainError, Result};

/// Safety margin subtracted from the token expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
/// App JWT lifetime; GitHub caps this at 10 minutes.
const JWT_LIFETIME_SECS: i64 = 600;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    fn is_fresh(&self) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now()
    }
}

pub struct AppAuth {
    app_id: String,
    encoding_key: EncodingKey,
    api_base: String,
    http: reqwest::Client,
    tokens: DashMap<i64, InstallationToken>,
}

impl AppAuth {
    pub fn new(app_id: &str, private_key_pem: &str, api_base: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| DomainError::Config(format!("invalid GitHub app private key: {e}")))?;
        Ok(AppAuth {
            app_id: app_id.to_string(),
            encoding_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            tokens: DashMap::new(),
        })
    }

    /// The app-level JWT used for `/app/*` endpoints.
    pub fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            // Backdated to absorb clock skew.
            iat: now - 60,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.clone(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| DomainError::Internal(format!("jwt encode: {e}")))
    }

    /// Installation token, from cache when still fresh.
    pub async fn installation_token(&self, installation_id: i64) -> Result<String> {
        if let Some(cached) = self.tokens.get(&installation_id) {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }

        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_base
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "lifecycle")
            .send()
            .await
            .map_err(|e| DomainError::Transient(format!("token exchange: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                DomainError::Transient(format!("token exchange {status}: {body}"))
            } else {
                DomainError::Permanent(format!("token exchange {status}: {body}"))
            });
        }

        let token: InstallationToken = response
            .json()
            .await
            .map_err(|e| DomainError::Transient(format!("token decode: {e}")))?;
        let value = token.token.clone();
        self.tokens.insert(installation_id, token);
        Ok(value)
    }

    /// Drop a cached token after a 401 so the next call re-authenticates.
    pub fn invalidate(&self, installation_id: i64) {
        self.tokens.remove(&installation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_tokens_are_not_fresh() {
        let stale = InstallationToken {
            token: "t".to_string(),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        // Inside the 60s margin.
        assert!(!stale.is_fresh());

        let fresh = InstallationToken {
            token: "t".to_string(),
            expires_at: Utc::now() + Duration::seconds(3600),
        };
        assert!(fresh.is_fresh());
    }
}
