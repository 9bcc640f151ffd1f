pub mod handlers;
pub mod webhook;

use std::sync::Arc;

use engine::{BuildService, GlobalConfigCache};
use github::ForgeClient;
use store::PgPool;

pub struct AppState {
    pub db_pool: PgPool,
    pub service: Arc<BuildService>,
    pub forge: Arc<ForgeClient>,
    pub config: GlobalConfigCache,
    pub webhook_secret: String,
}
