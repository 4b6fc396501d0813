//! Error types for the deployment orchestrator
//!
//! Distinguishes polled conditions that never became true (timeouts) from
//! missing preconditions, remote command failures and unimplemented features,
//! so callers can match on the failure instead of inspecting message text.

use std::time::Duration;
use thiserror::Error;

/// Problem reported by a Ceph health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthIssue {
    /// Monitors disagree on time (`MON_CLOCK_SKEW`)
    ClockSkew,
    /// Any other non-OK health state
    Degraded(String),
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthIssue::ClockSkew => write!(f, "clock skew detected"),
            HealthIssue::Degraded(status) => write!(f, "{}", status),
        }
    }
}

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Timeout / NotReady
    // =========================================================================
    #[error("{kind}/{name} did not reach {expected} within {waited:?} (last observed: {observed})")]
    ResourceWrongStatus {
        kind: String,
        name: String,
        expected: String,
        observed: String,
        waited: Duration,
    },

    #[error("RBD sidecar container count mismatch: expected {expected}, observed {observed}")]
    RbdSidecarMismatch { expected: usize, observed: usize },

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Unavailable resource: {0}")]
    UnavailableResource(String),

    #[error("Pod not created: {selector} on cluster {cluster}")]
    PodNotCreated { selector: String, cluster: String },

    #[error("Regional DR deployment failed: {0}")]
    DrDeployment(String),

    #[error("External cluster RGW endpoint missing")]
    RgwEndpointMissing,

    #[error("External cluster RGW endpoint port missing")]
    RgwEndpointPortMissing,

    #[error("External cluster has no Ceph filesystem")]
    CephfsMissing,

    // =========================================================================
    // Remote Command Errors
    // =========================================================================
    #[error("Command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Exporter script failed on external cluster: {stderr}")]
    ExporterRunFailed { stderr: String },

    #[error("Ceph health check failed: {issue} ({detail})")]
    CephHealth { issue: HealthIssue, detail: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Feature Errors
    // =========================================================================
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure class used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A polled condition never became true
    Timeout,
    /// A required external fact is missing; never retried
    Precondition,
    /// The control plane or a remote host rejected a call
    Remote,
    /// The requested feature is not available
    Unimplemented,
    /// Invalid configuration or input document
    Configuration,
    /// Bug or local I/O problem
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ResourceWrongStatus { .. } | Error::RbdSidecarMismatch { .. } => {
                ErrorClass::Timeout
            }

            Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::UnavailableResource(_)
            | Error::PodNotCreated { .. }
            | Error::DrDeployment(_)
            | Error::RgwEndpointMissing
            | Error::RgwEndpointPortMissing
            | Error::CephfsMissing => ErrorClass::Precondition,

            Error::CommandFailed { .. }
            | Error::ExporterRunFailed { .. }
            | Error::CephHealth { .. }
            | Error::Kube(_)
            | Error::Http(_) => ErrorClass::Remote,

            Error::UnsupportedFeature(_) | Error::NotImplemented(_) => ErrorClass::Unimplemented,

            Error::Configuration(_)
            | Error::KubeConfig(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Base64(_) => ErrorClass::Configuration,

            Error::Internal(_) | Error::Io(_) => ErrorClass::Internal,
        }
    }

    /// Whether a fixed-attempt retry loop may try the call again
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Remote)
    }

    /// Whether a poll may read again: throttling, server-side 5xx and
    /// transport failures. Rejections such as 403 or 422 are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 429 || resp.code >= 500,
            Error::Kube(kube::Error::HyperError(_)) | Error::Kube(kube::Error::Service(_)) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this is the "resource does not exist yet" signal
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether this is a Ceph health failure caused by monitor clock skew
    pub fn is_clock_skew(&self) -> bool {
        matches!(
            self,
            Error::CephHealth {
                issue: HealthIssue::ClockSkew,
                ..
            }
        )
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Error::CommandFailed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
