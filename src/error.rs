//! Error types for the GCP project operator
//!
//! Errors are structured with fields to aid debugging in production and are
//! classified by [`Error::is_retryable`], which the controller error policy
//! uses to decide between a backoff requeue and waiting for a spec change.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a desired-state resource
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.projectId")
        field: Option<String>,
    },

    /// Referenced credential resource does not exist
    #[error("credential {namespace}/{name} not found")]
    CredentialMissing {
        /// Namespace of the referenced credential
        namespace: String,
        /// Name of the referenced credential
        name: String,
    },

    /// Remote provider call failed
    #[error("provider error during {operation}{}: {message}", http_suffix(.status))]
    Provider {
        /// Logical provider operation (e.g., "CreateProject")
        operation: String,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Remote resource does not exist
    #[error("remote resource not found: {resource}")]
    NotFound {
        /// Provider resource path that was not found
        resource: String,
    },

    /// Resource already exists and cannot be created again
    #[error("resource already exists: {resource}")]
    AlreadyExists {
        /// Resource that already exists
        resource: String,
    },

    /// A poll loop or reconcile deadline was exceeded
    #[error("timed out waiting for {operation} after {elapsed_secs}s")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Seconds spent before giving up
        elapsed_secs: u64,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The payload kind being decoded (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "auth", "reconciler")
        context: String,
    },
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a resource and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transient provider error (network, 5xx, throttling)
    pub fn provider_transient(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            status: None,
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (rejected request)
    pub fn provider_permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            status: None,
            message: msg.into(),
            retryable: false,
        }
    }

    /// Classify an HTTP error response from the provider
    ///
    /// 409 gets its own variant so callers can branch on it. 408, 429 and
    /// 5xx are transient. Any other status, 404 included, is a rejection;
    /// callers for which a missing resource is a race map it to `NotFound`.
    pub fn from_status(
        operation: impl Into<String>,
        resource: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        match status {
            409 => Self::AlreadyExists {
                resource: resource.into(),
            },
            _ => Self::Provider {
                operation: operation.into(),
                status: Some(status),
                message: body.into(),
                retryable: status == 408 || status == 429 || status >= 500,
            },
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: elapsed.as_secs(),
        }
    }

    /// Create a serialization error for a payload kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors leave the resource status untouched and requeue with
    /// backoff. Everything else marks the resource Failed and waits for a
    /// spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::CredentialMissing { .. } => false,
            Error::Provider { retryable, .. } => *retryable,
            // a project vanishing between probe and fetch is a race, not a verdict
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Returns true if this is a remote NotFound
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if the provider answered with this HTTP status
    pub fn is_http_status(&self, code: u16) -> bool {
        matches!(self, Error::Provider { status: Some(s), .. } if *s == code)
    }

    /// Returns true if this is an AlreadyExists conflict
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Error::serialization_for_kind("http-response", e.to_string());
        }
        Error::provider_transient("http", e.to_string())
    }
}
