//! Error types for the Harbor Kubernetes Operator
//!
//! Errors fall into three families that drive what the reconciler does
//! with them:
//!
//! - **Transient** (`Transient`, temporary API answers): the owner gets
//!   `InProgress=True` and the request is requeued.
//! - **Fatal** (`Fatal`, validation, conversion, serialization, operator
//!   bugs): the owner gets `Failed=True` and is not requeued.
//! - **Retryable I/O** (everything else coming from the API client):
//!   bubbled up so the work queue retries with backoff.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reason recorded on `InProgress` when a child is not ready yet
pub const REASON_DEPENDENCY_STATUS: &str = "dependencyStatus";
/// Reason recorded on `Failed` when the owner spec is invalid
pub const REASON_INVALID_SPEC: &str = "invalidSpec";
/// Reason recorded on `Failed` when the operator itself misbehaved
pub const REASON_OPERATOR_ERROR: &str = "operatorError";
/// Reason recorded on `Failed` when a child spec is refused by the API server
pub const REASON_DEPENDENCY_SPEC: &str = "dependencySpec";

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Version conversion failed
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A resource was declared twice in the same graph
    #[error("Duplicate resource in graph: {0}")]
    DuplicateResource(String),

    /// A declared parent is not part of the graph
    #[error("Unknown parent {parent} for resource {child}")]
    UnknownParent { child: String, parent: String },

    /// Work that must be retried later (child not ready, API busy)
    #[error("{reason}: {message}")]
    Transient { reason: String, message: String },

    /// Work that cannot succeed until the owner or operator changes
    #[error("{reason}: {message}")]
    Fatal { reason: String, message: String },

    /// Error annotated with the operation that produced it
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<OperatorError>,
    },

    /// Error shared between concurrently running graph nodes
    #[error(transparent)]
    Shared(Arc<OperatorError>),

    /// The reconcile was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// How an error must be surfaced on the owner status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCause {
    /// `InProgress=True` with the given reason, requeue
    RetryLater { reason: String, message: String },
    /// `Failed=True` with the given reason, no requeue
    Unrecoverable { reason: String, message: String },
}

impl OperatorError {
    /// Build a retry-later error
    pub fn retry_later(reason: impl Into<String>, message: impl Into<String>) -> Self {
        OperatorError::Transient {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Build a retry-later error for a child which is not ready
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::retry_later(REASON_DEPENDENCY_STATUS, message)
    }

    /// Build an unrecoverable error
    pub fn fatal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        OperatorError::Fatal {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        OperatorError::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through wrapping and sharing
    pub fn root(&self) -> &OperatorError {
        match self {
            OperatorError::Wrapped { source, .. } => source.root(),
            OperatorError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Walk the wrapped chain and return the first status-bearing cause.
    ///
    /// `None` means the error is plain retryable I/O that only the work
    /// queue backoff should handle.
    pub fn status_cause(&self) -> Option<StatusCause> {
        match self {
            OperatorError::Wrapped { source, .. } => source.status_cause(),
            OperatorError::Shared(inner) => inner.status_cause(),
            OperatorError::Transient { reason, message } => Some(StatusCause::RetryLater {
                reason: reason.clone(),
                message: message.clone(),
            }),
            OperatorError::Cancelled => Some(StatusCause::RetryLater {
                reason: REASON_DEPENDENCY_STATUS.to_string(),
                message: self.to_string(),
            }),
            OperatorError::Fatal { reason, message } => Some(StatusCause::Unrecoverable {
                reason: reason.clone(),
                message: message.clone(),
            }),
            OperatorError::ValidationError(_) | OperatorError::InvalidConfig(_) => {
                Some(StatusCause::Unrecoverable {
                    reason: REASON_INVALID_SPEC.to_string(),
                    message: self.to_string(),
                })
            }
            OperatorError::Conversion(_)
            | OperatorError::SerializationError(_)
            | OperatorError::YamlError(_)
            | OperatorError::DuplicateResource(_)
            | OperatorError::UnknownParent { .. }
            | OperatorError::Internal(_) => Some(StatusCause::Unrecoverable {
                reason: REASON_OPERATOR_ERROR.to_string(),
                message: self.to_string(),
            }),
            OperatorError::KubeError(kube::Error::Api(resp)) => match resp.code {
                // forbidden, conflict, too many requests, unavailable, timeouts
                403 | 408 | 409 | 429 | 503 | 504 => Some(StatusCause::RetryLater {
                    reason: REASON_DEPENDENCY_STATUS.to_string(),
                    message: resp.message.clone(),
                }),
                // the API server refused the child we built
                400 | 422 => Some(StatusCause::Unrecoverable {
                    reason: REASON_DEPENDENCY_SPEC.to_string(),
                    message: resp.message.clone(),
                }),
                _ => None,
            },
            OperatorError::KubeError(_) | OperatorError::NotFound { .. } => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.status_cause(),
            Some(StatusCause::Unrecoverable { .. })
        )
    }

    /// First retry delay of a retryable error, grown exponentially by the
    /// controller. `None` means only a change to the owner can help.
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self.status_cause() {
            Some(StatusCause::RetryLater { .. }) => Some(Duration::from_secs(5)),
            Some(StatusCause::Unrecoverable { .. }) => None,
            None => Some(Duration::from_secs(30)),
        }
    }
}

impl From<Arc<OperatorError>> for OperatorError {
    fn from(err: Arc<OperatorError>) -> Self {
        OperatorError::Shared(err)
    }
}
