//! Build/deploy core: the state machine driving every build through
//! resolve, image build, Helm release, status aggregation, and webhook
//! dispatch, with all fan-out travelling through the durable queues.

pub mod bootstrap;
pub mod builder;
pub mod comment;
pub mod config_cache;
pub mod deploy;
pub mod helm;
pub mod ids;
pub mod image;
pub mod jobs;
pub mod render;
pub mod resolve;
pub mod service;
pub mod teardown;
pub mod webhooks;

pub use bootstrap::{bootstrap, Runtime};
pub use config_cache::GlobalConfigCache;
pub use service::{BuildService, DeployJobPayload, ResolvePayload, WebhookJobPayload};
