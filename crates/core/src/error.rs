use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Statuses a FHIR store or cloud API may answer with that are worth another attempt
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Result alias used across the delivery crates
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Every way a unit of healthcare data can fail to reach its sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No response was obtained (connection refused, reset, timed out)
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A response was obtained but carried an error status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The identity source could not produce a credential
    #[error("credential acquisition failed: {message}")]
    Auth { message: String },

    /// The store accepted the batch but rejected some of its entries
    #[error("{failed} bundle entries rejected by the FHIR store")]
    PartialBundleFailure { failed: usize },

    /// Malformed input; nothing was sent or written
    #[error("invalid input: {message}")]
    Validation { message: String },

    /// Required configuration is missing or malformed
    #[error("{message}")]
    Config { message: String },

    /// Object storage read or write failed
    #[error("storage error: {message}")]
    Storage { message: String },

    /// The message bus refused a publish
    #[error("publish failed: {message}")]
    Publish { message: String },
}

impl DeliveryError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http { status, body: body.into() }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn partial_bundle_failure(failed: usize) -> Self {
        Self::PartialBundleFailure { failed }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Configuration error for an unset environment variable
    pub fn missing_env(name: &str) -> Self {
        Self::config(format!(
            "Environment variable '{name}' not set. The environment variable must be set."
        ))
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish { message: message.into() }
    }

    /// Whether a local retry may turn this failure into a success.
    ///
    /// Transport failures, bus rejections and HTTP statuses in
    /// [`RETRYABLE_STATUSES`] are transient. Everything else is permanent for
    /// the current invocation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Publish { .. } => true,
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Auth { .. }
            | Self::PartialBundleFailure { .. }
            | Self::Validation { .. }
            | Self::Config { .. }
            | Self::Storage { .. } => false,
        }
    }

    /// Whether the failure must abort the whole invocation.
    ///
    /// Missing credentials or configuration affect every unit of work alike,
    /// so they are never retried or dead-lettered.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), FailureKind::Auth | FailureKind::Config)
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::Transport,
            Self::Http { .. } => FailureKind::Http,
            Self::Auth { .. } => FailureKind::Auth,
            Self::PartialBundleFailure { .. } => FailureKind::PartialBundleFailure,
            Self::Validation { .. } => FailureKind::Validation,
            Self::Config { .. } => FailureKind::Config,
            Self::Storage { .. } => FailureKind::Storage,
            Self::Publish { .. } => FailureKind::Publish,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Tag of a failure, stable across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Http,
    Auth,
    PartialBundleFailure,
    Validation,
    Config,
    Storage,
    Publish,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Http => "http",
            Self::Auth => "auth",
            Self::PartialBundleFailure => "partial_bundle_failure",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one failure shape every component reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<DeliveryError> for Failure {
    fn from(err: DeliveryError) -> Self {
        err.to_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(DeliveryError::transport("connection reset").is_retryable());
        assert!(DeliveryError::publish("deadline exceeded").is_retryable());
        for status in RETRYABLE_STATUSES {
            assert!(DeliveryError::http(status, "").is_retryable());
        }
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!DeliveryError::http(400, "bad request").is_retryable());
        assert!(!DeliveryError::http(401, "").is_retryable());
        assert!(!DeliveryError::auth("no default credentials").is_retryable());
        assert!(!DeliveryError::validation("unknown prefix").is_retryable());
        assert!(!DeliveryError::missing_env("TOPIC_ID").is_retryable());
        assert!(!DeliveryError::partial_bundle_failure(2).is_retryable());
    }

    #[test]
    fn only_auth_and_config_failures_are_fatal() {
        assert!(DeliveryError::auth("no default credentials").is_fatal());
        assert!(DeliveryError::missing_env("TOPIC_ID").is_fatal());
        assert!(!DeliveryError::publish("deadline exceeded").is_fatal());
        assert!(!DeliveryError::transport("connection reset").is_fatal());
        assert!(!DeliveryError::http(400, "").is_fatal());
        assert!(!DeliveryError::storage("bucket gone").is_fatal());
    }

    #[test]
    fn missing_env_message_names_the_variable() {
        let err = DeliveryError::missing_env("PHI_STORAGE_BUCKET");
        assert_eq!(
            err.to_string(),
            "Environment variable 'PHI_STORAGE_BUCKET' not set. The environment variable must be set."
        );
        assert_eq!(err.kind(), FailureKind::Config);
    }

    #[test]
    fn failure_serializes_with_snake_case_kind() {
        let failure = DeliveryError::partial_bundle_failure(1).to_failure();
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "partial_bundle_failure");
        assert_eq!(json["message"], "1 bundle entries rejected by the FHIR store");
    }
}
