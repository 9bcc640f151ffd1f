//! Shared process wiring for the API and worker binaries: one pool, one
//! redis connection manager, one forge client, one build service.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use github::{AppAuth, ClientLimits, ForgeClient, RequestCache};
use queue::{LockManager, QueueManager};
use shared::Settings;
use store::PgPool;

use crate::builder::cluster::ClusterBuilder;
use crate::builder::codefresh::CodefreshCli;
use crate::builder::HttpRegistryProbe;
use crate::config_cache::GlobalConfigCache;
use crate::helm::HelmCli;
use crate::jobs::KubeJobRunner;
use crate::service::BuildService;

const GITHUB_API_BASE: &str = "https://api.github.com";

pub struct Runtime {
    pub pool: PgPool,
    pub queues: Arc<QueueManager>,
    pub service: Arc<BuildService>,
    pub forge: Arc<ForgeClient>,
    pub config: GlobalConfigCache,
}

pub async fn bootstrap(settings: &Settings) -> Result<Runtime> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.database_max_connections)
        .connect(&settings.database_url)
        .await
        .context("database connect")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("migrations")?;

    let redis_client = redis::Client::open(settings.redis_url.as_str()).context("redis url")?;
    let redis_conn = redis_client
        .get_connection_manager()
        .await
        .context("redis connect")?;

    let auth = Arc::new(AppAuth::new(
        &settings.github_app_id,
        &settings.github_private_key,
        GITHUB_API_BASE,
    )?);
    let limits = ClientLimits {
        max_concurrent: settings.github_max_concurrent,
        max_per_window: settings.max_github_api_request,
        window: std::time::Duration::from_secs(settings.github_api_request_interval),
    };
    let cache = RequestCache::new(redis_conn.clone(), settings.request_cache_ttl);
    let forge = Arc::new(ForgeClient::new(
        Arc::clone(&auth),
        cache,
        GITHUB_API_BASE,
        limits,
    ));

    let queues = Arc::new(QueueManager::new(redis_conn.clone(), &settings.job_version));
    let locks = LockManager::new(redis_conn.clone());
    let config = GlobalConfigCache::new(pool.clone(), redis_conn);

    let kube_client = kube::Client::try_default()
        .await
        .context("kubernetes client")?;
    let job_runner = Arc::new(KubeJobRunner::new(kube_client));

    let global = config.get().await.unwrap_or_default();
    let builder = Arc::new(ClusterBuilder::new(
        job_runner.clone(),
        Arc::clone(&auth),
        &global.image_registry,
    ));

    let service = BuildService::new(
        pool.clone(),
        Arc::clone(&queues),
        locks,
        Arc::clone(&forge),
        config.clone(),
        builder,
        Arc::new(HttpRegistryProbe::new()),
        Arc::new(HelmCli::default()),
        job_runner,
        CodefreshCli::default(),
    );

    Ok(Runtime {
        pool,
        queues,
        service,
        forge,
        config,
    })
}
