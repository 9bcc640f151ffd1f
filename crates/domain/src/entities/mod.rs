pub mod build;
pub mod deploy;
pub mod deployable;
pub mod environment;
pub mod global_config;
pub mod pull_request;
pub mod repository;
pub mod webhook;

pub use build::{Build, BuildPatch};
pub use deploy::{Deploy, DeployPatch, DeploySummaryRow};
pub use deployable::{
    ChartSpec, CodefreshSpec, Deployable, DeployablePatch, DeploymentSpec, DockerSpec, HelmSpec,
    KedaScaleToZero, PortSpec, RestoreSpec,
};
pub use environment::Environment;
pub use global_config::{DomainDefaults, GlobalConfig, GlobalConfigEntry};
pub use pull_request::{PullRequest, PullRequestPatch};
pub use repository::Repository;
pub use webhook::{Webhook, WebhookInvocation, WebhookType};
