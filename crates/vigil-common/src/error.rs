//! Error types for the Vigil node controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Each error variant includes contextual information like node names
//! and underlying causes.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Vigil operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for controller configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "node-monitor-grace-period")
        field: Option<String>,
    },

    /// Cloud provider query error
    #[error("cloud provider error for node {node}: {message}")]
    CloudProvider {
        /// Name of the node being queried
        node: String,
        /// Description of what failed
        message: String,
    },

    /// Pod eviction error
    #[error("eviction error for node {node}: {message}")]
    Eviction {
        /// Name of the node whose pods were being evicted
        node: String,
        /// Description of what failed
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
        /// Context where the error occurred (e.g., "monitor", "sweeper")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a cloud provider error for a specific node
    pub fn cloud_provider(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CloudProvider {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create an eviction error for a specific node
    pub fn eviction(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Eviction {
            node: node.into(),
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
    /// Validation and serialization errors are not retryable (require a
    /// config or code fix). Everything else is handled by the next tick
    /// or the next queue drain, so it counts as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout)
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::CloudProvider { .. } => true,
            Error::Eviction { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the node name if this error is associated with a specific node
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::CloudProvider { node, .. } => Some(node),
            Error::Eviction { node, .. } => Some(node),
            _ => None,
        }
    }
}
