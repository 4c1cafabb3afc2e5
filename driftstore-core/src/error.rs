//! Error types shared by every layer of the engine.

use std::fmt;

use thiserror::Error;

use crate::context::OperationKind;

/// The stable set of error kinds the engine can surface.
///
/// Every kind maps to a stable identifier (`StoreError::code`) so UI/
/// translation layers never have to match on the `Display` string.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The queried id was absent from the backend.
    #[error("entity not found")]
    NotFound,

    /// A write was rejected because the remote side has a newer version.
    #[error("write conflict")]
    Conflict {
        /// The payload this caller attempted to write, serialized as a string
        /// for transport-agnostic surfacing to the consumer.
        local: String,
        /// The conflicting remote payload, if the backend returned one.
        remote: Option<String>,
    },

    /// Transport failure talking to the backend. Feeds the circuit breaker.
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend rejected credentials or a policy check (e.g. row-level
    /// security).
    #[error("permission denied")]
    PermissionDenied,

    /// An operation-level deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// The consumer cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Input violated a backend constraint (e.g. foreign key).
    #[error("validation error: {0}")]
    Validation(String),

    /// The reliability wrapper refused to call the backend because the
    /// circuit breaker is open.
    #[error("circuit open")]
    CircuitOpen,

    /// The store was called before `initialize()` or after `close()`.
    #[error("lifecycle error: store is not ready")]
    Lifecycle,

    /// An invalid configuration was detected at `initialize()`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Surfaced verbatim from a security collaborator.
    #[error("encryption error: {0}")]
    Encryption(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invariant violation. Always a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Stable identifier for this error kind, suitable for UI mapping.
    pub const fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Network(_) => "network",
            StoreError::PermissionDenied => "permission_denied",
            StoreError::Timeout => "timeout",
            StoreError::Cancelled => "cancelled",
            StoreError::Validation(_) => "validation",
            StoreError::CircuitOpen => "circuit_open",
            StoreError::Lifecycle => "lifecycle",
            StoreError::Configuration(_) => "configuration",
            StoreError::Encryption(_) => "encryption",
            StoreError::Internal(_) => "internal",
        }
    }

    /// True for errors a retry interceptor may consider transient.
    pub const fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network(_) | StoreError::Timeout)
    }
}

/// A `StoreError` with the operation and entity id that produced it attached.
///
/// The facade attaches this context at its boundary; inner layers just
/// return bare `StoreError`.
#[derive(Debug, Error)]
#[error("{source} (operation={operation:?}, entity_id={entity_id:?})")]
pub struct ContextualError {
    /// The underlying error.
    #[source]
    pub source: StoreError,
    /// The kind of operation that was being performed.
    pub operation: OperationKind,
    /// The entity id involved, if any (absent for e.g. `get_all`).
    pub entity_id: Option<String>,
}

impl ContextualError {
    /// Attaches operation/entity context to a bare error.
    pub fn new(source: StoreError, operation: OperationKind, entity_id: Option<String>) -> Self {
        Self {
            source,
            operation,
            entity_id,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
