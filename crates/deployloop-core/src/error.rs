use crate::types::DeploymentKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("no deployment markers recognized in {0} (kind: unknown)")]
    Detection(String),

    #[error("{kind} deployment failed at step '{step}'\n{log}")]
    Deployment {
        kind: DeploymentKind,
        step: String,
        log: String,
    },

    #[error("stack outputs unavailable for {kind}: {reason}")]
    OutputsUnavailable {
        kind: DeploymentKind,
        reason: String,
    },

    #[error("no API endpoint found in stack outputs (keys: {keys})")]
    NoEndpointFound { keys: String },

    #[error("test plan has no runnable suites")]
    EmptyPlan,

    #[error("no log artifact to diagnose: {0}")]
    NoLogs(String),

    #[error("invalid scaffold plan: {0}")]
    InvalidScaffold(String),

    #[error("artifact not found: {0} (run the earlier stage first)")]
    ArtifactMissing(String),

    #[error("no run found: start one with 'deployloop run' or 'deployloop detect'")]
    NoRun,

    #[error("invalid run id: '{0}'")]
    InvalidRunId(String),

    #[error("AI generation failed: {0}")]
    Gateway(#[from] ai_gateway::GatewayError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoopError>;
