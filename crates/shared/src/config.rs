use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Process configuration, read once at startup. Field names map 1:1 to the
/// environment (`DATABASE_URL`, `GITHUB_APP_ID`, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: String,
    /// Suffix appended to every queue name so parallel versions of the
    /// worker fleet never consume each other's jobs.
    pub job_version: String,
    pub log_level: String,
    pub app_host: String,
    pub app_port: u16,

    pub github_app_id: String,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    /// Requests allowed per interval window (the forge-side rate limit).
    pub max_github_api_request: u32,
    /// Window length in seconds for `max_github_api_request`.
    pub github_api_request_interval: u64,
    /// Concurrent outstanding forge requests.
    pub github_max_concurrent: u32,

    /// Forge response cache TTL in seconds.
    pub request_cache_ttl: u64,
    pub database_max_connections: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .set_default("job_version", "v1")?
            .set_default("log_level", "info")?
            .set_default("app_host", "0.0.0.0")?
            .set_default("app_port", 8080)?
            .set_default("max_github_api_request", 40)?
            .set_default("github_api_request_interval", 10)?
            .set_default("github_max_concurrent", 100)?
            .set_default("request_cache_ttl", 600)?
            .set_default("database_max_connections", 10)?
            .build()?;

        cfg.try_deserialize()
    }
}

/// Initialize tracing/logging
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_rate_limits() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/lifecycle");
        std::env::set_var("REDIS_URL", "redis://localhost");
        std::env::set_var("GITHUB_APP_ID", "1234");
        std::env::set_var("GITHUB_PRIVATE_KEY", "key");
        std::env::set_var("GITHUB_WEBHOOK_SECRET", "secret");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.max_github_api_request, 40);
        assert_eq!(settings.github_api_request_interval, 10);
        assert_eq!(settings.github_max_concurrent, 100);
        assert_eq!(settings.job_version, "v1");
    }
}
