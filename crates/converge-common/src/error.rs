//! Error types for the converge engine
//!
//! Remote failures keep the machine-readable code the remote API returned so
//! the engine can classify them. Every other variant describes a failure
//! inside the engine itself or in its Kubernetes adapters.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// A failure returned by a remote resource API call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    /// Machine-readable error code (e.g. `ResourceInUseException`)
    pub code: String,
    /// Human-readable message from the remote system
    pub message: String,
}

impl RemoteError {
    /// Create a remote error from a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this error carries the given code
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Main error type for converge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Remote API failure that could not be classified as terminal or transient
    #[error("remote error during {operation}: {source}")]
    Remote {
        /// Remote operation that failed (e.g. `UpdateClusterConfig`)
        operation: String,
        /// The error returned by the remote API
        #[source]
        source: RemoteError,
    },

    /// Validation error for a desired state or engine configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "scalingConfig.desiredSize")
        field: Option<String>,
    },

    /// Malformed Kubernetes version string
    #[error("invalid version '{version}': {message}")]
    Version {
        /// The version string that failed to parse
        version: String,
        /// Description of what's wrong with it
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "orchestrator", "tags")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
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

    /// Wrap a remote error that must propagate to the caller
    pub fn remote(operation: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            operation: operation.into(),
            source,
        }
    }

    /// Create a version parse error
    pub fn version(version: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Version {
            version: version.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
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
    /// Validation, version and serialization errors need a spec change.
    /// Unclassified remote errors are left to the caller's default retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Remote { .. } => true,
            Error::Validation { .. } => false,
            Error::Version { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Get the remote error code, if this error came from the remote API
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Error::Remote { source, .. } => Some(&source.code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
