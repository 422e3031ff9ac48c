//! Error types shared across the agent library.

use thiserror::Error;

/// Result type for the agent library
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error type
#[derive(Error, Debug)]
pub enum AgentError {
    /// Bad flag, environment variable, or annotation value
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The Cronitor API answered outside the accepted status range
    #[error("cronitor api rejected request to {url}: status {status}: {body}")]
    RemoteRejected {
        url: String,
        status: u16,
        body: String,
    },

    /// Transport-level failure talking to the Cronitor API, DNS included
    #[error("cronitor api unreachable: {0}")]
    RemoteUnreachable(#[from] reqwest::Error),

    /// The presign endpoint returned a response without an upload URL
    #[error("no presigned upload url returned for series {series}")]
    PresignMissingUrl { series: String },

    /// Correlation lookup of a pod that no longer exists
    #[error("pod {namespace}/{name} not found")]
    PodNotFound {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Correlation lookup of a job that no longer exists
    #[error("job {namespace}/{name} not found")]
    JobNotFound {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The first owner reference was not of the kind the walk expected
    #[error("expected owner reference of kind {expected}, got {got}")]
    OwnerChainInvalid {
        expected: &'static str,
        got: String,
    },

    /// The apiserver version could not be compared to the support threshold
    #[error("unsupported kubernetes server version \"{version}\"")]
    VersionUnsupported { version: String },

    /// An orchestrator event reason with no telemetry mapping
    #[error("unknown {kind} event reason \"{reason}\" received")]
    UnknownEventReason { kind: &'static str, reason: String },

    /// Any other Kubernetes API error
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

impl AgentError {
    /// True for the stale-event lookups that are dropped at debug level.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AgentError::PodNotFound { .. } | AgentError::JobNotFound { .. }
        )
    }
}
