//! Error types for the Vigil operator
//!
//! The taxonomy mirrors how errors are handled, not where they originate:
//! benign Kubernetes errors (NotFound, Conflict) are classified with helper
//! predicates rather than separate variants, validation failures are scoped
//! to a single child object, and readiness failures are ordinary
//! stop-and-requeue conditions.

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

    /// Malformed content on a child spec (dashboard, datasource, channel).
    ///
    /// Fatal to that one child only; siblings are unaffected.
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Namespaced name of the invalid object
        object: String,
        /// Description of what's invalid
        message: String,
    },

    /// A planned readiness check found its target not yet ready.
    ///
    /// Halts the remaining actions of the current cycle and triggers a
    /// fixed-delay requeue. Not a failure of the instance.
    #[error("{resource} not ready: {message}")]
    NotReady {
        /// The resource being checked (e.g. "deployment/vigil")
        resource: String,
        /// What is still missing
        message: String,
    },

    /// Remote plugin registry probe failure.
    ///
    /// Degrades a single plugin from valid to failed; never aborts
    /// resolution of the remaining plugins.
    #[error("registry probe failed for plugin {plugin}: {message}")]
    Probe {
        /// name@version of the plugin that failed the probe
        plugin: String,
        /// Transport or status description
        message: String,
    },

    /// Config serialization failure
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "planner", "state-bus")
        context: String,
    },
}

impl Error {
    /// Create a validation error for a specific child object
    pub fn validation(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a not-ready error for a resource
    pub fn not_ready(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotReady {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a probe error for a single plugin
    pub fn probe(plugin: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Probe {
            plugin: plugin.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
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

    /// Check if this error is retryable.
    ///
    /// Validation and serialization errors are not (they require a spec
    /// change). NotReady is retryable by definition. Kubernetes errors
    /// depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Validation { .. } => false,
            Error::NotReady { .. } => true,
            Error::Probe { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when this error halts the action list but is expected during
    /// normal convergence (a readiness check that has not passed yet).
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady { .. })
    }
}

/// True when a Kubernetes error is a 404 NotFound.
///
/// NotFound is benign during snapshot reads: the handle is simply absent
/// and the planner emits a Create.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when a Kubernetes error is a 409 Conflict.
///
/// Conflicts on update are benign: the object is re-read and re-diffed on
/// the next cycle under optimistic concurrency.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}
