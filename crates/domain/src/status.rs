use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::Validation(format!(
                        "unknown {} value: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
                s.parse()
            }
        }
    };
}

text_enum!(BuildStatus {
    Pending => "pending",
    Queued => "queued",
    Building => "building",
    Built => "built",
    Deploying => "deploying",
    Deployed => "deployed",
    Error => "error",
    ConfigError => "config_error",
    TearingDown => "tearing_down",
    TornDown => "torn_down",
});

impl BuildStatus {
    /// Terminal states; webhook dispatch happens on the subset that carries
    /// user-visible meaning (`Deployed`, `Error`, `TornDown`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Deployed
                | BuildStatus::Error
                | BuildStatus::ConfigError
                | BuildStatus::TornDown
        )
    }

    pub fn fires_webhooks(&self) -> bool {
        matches!(
            self,
            BuildStatus::Deployed | BuildStatus::Error | BuildStatus::TornDown
        )
    }

    /// Allowed forward transitions. The build status is monotonic within a
    /// run; a redeploy re-enters at `Queued`, and teardown is reachable from
    /// every non-torn-down state.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;

        if next == TearingDown {
            return *self != TornDown && *self != TearingDown;
        }

        match self {
            Pending => matches!(next, Queued | ConfigError),
            Queued => matches!(next, Building | Error | ConfigError),
            Building => matches!(next, Built | Deploying | Error | ConfigError),
            Built => matches!(next, Deploying | Error),
            Deploying => matches!(next, Deployed | Error),
            Deployed => matches!(next, Queued | Error),
            Error | ConfigError => matches!(next, Queued),
            TearingDown => matches!(next, TornDown),
            TornDown => false,
        }
    }

    pub fn transition_to(&self, next: BuildStatus) -> Result<BuildStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                entity: "build".to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

text_enum!(DeployStatus {
    Queued => "queued",
    Cloning => "cloning",
    Building => "building",
    Built => "built",
    Deploying => "deploying",
    Waiting => "waiting",
    Ready => "ready",
    BuildFailed => "build_failed",
    DeployFailed => "deploy_failed",
    Error => "error",
    TornDown => "torn_down",
});

impl DeployStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeployStatus::BuildFailed | DeployStatus::DeployFailed | DeployStatus::Error
        )
    }

    pub fn can_transition_to(&self, next: DeployStatus) -> bool {
        use DeployStatus::*;

        if next == TornDown {
            return *self != TornDown;
        }
        if self.is_failure() {
            return matches!(next, Queued);
        }

        match self {
            Queued => matches!(
                next,
                Cloning | Building | Deploying | Waiting | Ready | BuildFailed | Error
            ),
            Cloning => matches!(next, Building | BuildFailed | Error),
            Building => matches!(next, Built | BuildFailed | Error),
            Built => matches!(next, Deploying | Waiting | DeployFailed | Error),
            Deploying => matches!(next, Ready | Waiting | DeployFailed | Error),
            Waiting => matches!(next, Deploying | Waiting | DeployFailed | Error),
            Ready => matches!(next, Queued | Deploying),
            BuildFailed | DeployFailed | Error => matches!(next, Queued),
            TornDown => false,
        }
    }
}

text_enum!(PullRequestStatus {
    Open => "open",
    Closed => "closed",
    Merged => "merged",
});

text_enum!(WebhookInvocationStatus {
    Executing => "executing",
    Completed => "completed",
    Failed => "failed",
});

text_enum!(DeployType {
    Github => "github",
    Docker => "docker",
    Codefresh => "codefresh",
    ExternalHttp => "externalHttp",
    AuroraRestore => "auroraRestore",
    RdsRestore => "rdsRestore",
    Configuration => "configuration",
    Helm => "helm",
});

impl DeployType {
    pub const ALL: [DeployType; 8] = [
        DeployType::Github,
        DeployType::Docker,
        DeployType::Codefresh,
        DeployType::ExternalHttp,
        DeployType::AuroraRestore,
        DeployType::RdsRestore,
        DeployType::Configuration,
        DeployType::Helm,
    ];

    /// Types whose deploys go through an image build before release.
    pub fn builds_image(&self) -> bool {
        matches!(self, DeployType::Github | DeployType::Docker)
    }

    /// Types that are ready as soon as they resolve: nothing to build or
    /// release in-cluster.
    pub fn is_passive(&self) -> bool {
        matches!(self, DeployType::ExternalHttp | DeployType::Configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_happy_path_is_allowed() {
        use BuildStatus::*;
        let path = [Pending, Queued, Building, Built, Deploying, Deployed];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn build_status_never_goes_backwards() {
        use BuildStatus::*;
        assert!(!Deployed.can_transition_to(Building));
        assert!(!Built.can_transition_to(Queued));
        assert!(!Deploying.can_transition_to(Built));
    }

    #[test]
    fn teardown_reachable_from_any_non_terminal() {
        use BuildStatus::*;
        for status in [
            Pending, Queued, Building, Built, Deploying, Deployed, Error, ConfigError,
        ] {
            assert!(status.can_transition_to(TearingDown), "{status}");
        }
        assert!(!TornDown.can_transition_to(TearingDown));
        assert!(TearingDown.can_transition_to(TornDown));
    }

    #[test]
    fn torn_down_is_final() {
        use BuildStatus::*;
        for status in [
            Pending, Queued, Building, Built, Deploying, Deployed, Error, ConfigError,
            TearingDown,
        ] {
            assert!(!TornDown.can_transition_to(status));
        }
    }

    #[test]
    fn deploy_waiting_loops_until_deploying() {
        use DeployStatus::*;
        assert!(Waiting.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Deploying));
        assert!(!Waiting.can_transition_to(Building));
    }

    #[test]
    fn failed_deploys_can_only_requeue_or_tear_down() {
        use DeployStatus::*;
        for failed in [BuildFailed, DeployFailed, Error] {
            assert!(failed.is_failure());
            assert!(failed.can_transition_to(Queued));
            assert!(failed.can_transition_to(TornDown));
            assert!(!failed.can_transition_to(Ready));
            assert!(!failed.can_transition_to(Deploying));
        }
    }

    #[test]
    fn passive_deploy_types_skip_the_image_build() {
        assert!(DeployType::Github.builds_image());
        assert!(DeployType::Docker.builds_image());
        assert!(DeployType::ExternalHttp.is_passive());
        assert!(DeployType::Configuration.is_passive());
        assert!(!DeployType::Helm.builds_image());
        assert!(!DeployType::Helm.is_passive());
    }

    #[test]
    fn webhook_states_are_the_terminal_user_visible_ones() {
        assert!(BuildStatus::Deployed.fires_webhooks());
        assert!(BuildStatus::Error.fires_webhooks());
        assert!(BuildStatus::TornDown.fires_webhooks());
        assert!(!BuildStatus::ConfigError.fires_webhooks());
        assert!(!BuildStatus::Building.fires_webhooks());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            BuildStatus::Pending,
            BuildStatus::ConfigError,
            BuildStatus::TornDown,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert_eq!(
            "externalHttp".parse::<DeployType>().unwrap(),
            DeployType::ExternalHttp
        );
        assert!("frontend".parse::<DeployType>().is_err());
    }
}
