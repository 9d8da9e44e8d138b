//! Error types for the SVM operator
//!
//! Provides structured error types for every stage of a reconciliation pass:
//! configuration and credential resolution, remote API calls, asynchronous
//! jobs, interface identity resolution and teardown.

use std::time::Duration;
use thiserror::Error;

/// Requeue delay used when a bounded teardown loop gives up.
pub const TEARDOWN_BACKLOG_REQUEUE: Duration = Duration::from_secs(30);

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid management host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    #[error("Credential secret not found: {namespace}/{name}")]
    CredentialNotFound { namespace: String, name: String },

    #[error("Credential secret {namespace}/{name} is missing field {field:?}")]
    CredentialMalformed {
        namespace: String,
        name: String,
        field: String,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Remote API Errors
    // =========================================================================
    #[error("Remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote resource not found: {path}")]
    RemoteNotFound { path: String },

    #[error("Remote API error (HTTP {status}{}): {message}", code.as_ref().map(|c| format!(", code {}", c)).unwrap_or_default())]
    RemoteApi {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Unexpected response from {path}: {reason}")]
    UnexpectedResponse { path: String, reason: String },

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("job failed with code {code}: {message}")]
    JobFailed { code: i64, message: String },

    #[error("job {uuid} still pending after {polls} polls")]
    JobPending { uuid: String, polls: u32 },

    // =========================================================================
    // Interface Identity Errors
    // =========================================================================
    #[error(
        "Ambiguous network interface: name {name:?} matches interface #{name_index} \
         but address {address} matches interface #{address_index}"
    )]
    AmbiguousInterface {
        name: String,
        address: String,
        name_index: usize,
        address_index: usize,
    },

    #[error("Invalid netmask: {0}")]
    InvalidNetmask(String),

    // =========================================================================
    // Teardown Errors
    // =========================================================================
    #[error("Too many attempts removing {resource} ({attempts} attempts), try again later")]
    TooManyAttempts { resource: String, attempts: u32 },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue after the configured transient retry interval
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Remote backlog - come back later, not a failure
            Error::TooManyAttempts { .. } => ErrorAction::RequeueAfter(TEARDOWN_BACKLOG_REQUEUE),

            // Configuration/credential/identity errors - need a spec or secret edit
            Error::Configuration(_)
            | Error::InvalidHost { .. }
            | Error::CredentialNotFound { .. }
            | Error::CredentialMalformed { .. }
            | Error::AmbiguousInterface { .. }
            | Error::InvalidNetmask(_) => ErrorAction::NoRequeue,

            // All other errors - retry
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Whether the remote API reported the resource as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RemoteNotFound { .. })
    }

    /// Short machine-readable reason used in condition records
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Internal(_) => "InternalError",
            Error::Configuration(_) => "InvalidConfiguration",
            Error::InvalidHost { .. } => "InvalidHost",
            Error::CredentialNotFound { .. } => "CredentialNotFound",
            Error::CredentialMalformed { .. } => "CredentialMalformed",
            Error::Kube(_) | Error::ResourceNotFound { .. } => "KubernetesError",
            Error::Transport(_) => "TransportError",
            Error::RemoteNotFound { .. } => "RemoteNotFound",
            Error::RemoteApi { .. } | Error::UnexpectedResponse { .. } => "RemoteApiError",
            Error::JobFailed { .. } => "JobFailed",
            Error::JobPending { .. } => "JobPending",
            Error::AmbiguousInterface { .. } => "AmbiguousInterface",
            Error::InvalidNetmask(_) => "InvalidNetmask",
            Error::TooManyAttempts { .. } => "TooManyAttempts",
            Error::JsonParse(_) => "InvalidResponse",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::TooManyAttempts {
            resource: "svm peers".into(),
            attempts: 5,
        };
        assert_eq!(err.action(), ErrorAction::RequeueAfter(TEARDOWN_BACKLOG_REQUEUE));

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::JobFailed {
            code: 17,
            message: "disk full".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        let missing = Error::RemoteNotFound {
            path: "/api/svm/svms/abc".into(),
        };
        assert!(missing.is_retryable());
        assert!(missing.is_not_found());

        let ambiguous = Error::AmbiguousInterface {
            name: "lif1".into(),
            address: "10.0.0.1".into(),
            name_index: 0,
            address_index: 1,
        };
        assert!(!ambiguous.is_retryable());
    }

    #[test]
    fn test_job_failure_message_is_verbatim() {
        let err = Error::JobFailed {
            code: 17,
            message: "disk full".into(),
        };
        assert_eq!(err.to_string(), "job failed with code 17: disk full");
    }

    #[test]
    fn test_remote_api_display() {
        let err = Error::RemoteApi {
            status: 409,
            code: Some("13001".into()),
            message: "duplicate entry".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote API error (HTTP 409, code 13001): duplicate entry"
        );
    }
}
