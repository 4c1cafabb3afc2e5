//! Pending-change records and conflict details produced by the sync
//! machine's apply step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The kind of mutation a [`PendingChange`] represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum ChangeKind {
    /// A create or full replace.
    Save,
    /// A delete.
    Delete,
}

/// Lifecycle of a single queued mutation, from enqueue to terminal state.
///
/// `queued -> in_flight -> { Synced (removed) | Failed | Conflicting }`.
/// `Failed` entries are re-queued by the retry scheduler up to
/// `RetryConfig::max_attempts`, after which they settle at `Failed` for good.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum ChangeStatus {
    /// Waiting for a sync drain to pick it up.
    Queued,
    /// Currently being applied to the backend.
    InFlight,
    /// Applied successfully; the entry is removed from the queue shortly
    /// after reaching this state.
    Synced,
    /// The backend rejected the change with a transient error and retries
    /// are exhausted.
    Failed,
    /// The backend reported a version mismatch; awaiting resolution.
    Conflicting,
}

/// A queued local mutation awaiting backend synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange<T, ID> {
    /// Monotonically increasing id assigned at enqueue time, used as the
    /// queue's FIFO order key.
    pub sequence: u64,
    /// The entity this change applies to.
    pub entity_id: ID,
    /// Create/replace or delete.
    pub kind: ChangeKind,
    /// The payload to apply, for `Save`; `None` for `Delete`.
    pub payload: Option<T>,
    /// Current lifecycle state.
    pub status: ChangeStatus,
    /// Number of apply attempts made so far.
    pub attempts: u32,
    /// When this change was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the next retry is eligible, if `status == Failed`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Populated once `status == Conflicting`.
    pub conflict: Option<ConflictDetails<T>>,
}

impl<T, ID> PendingChange<T, ID> {
    /// Builds a freshly queued change.
    pub fn new(sequence: u64, entity_id: ID, kind: ChangeKind, payload: Option<T>, now: DateTime<Utc>) -> Self {
        PendingChange {
            sequence,
            entity_id,
            kind,
            payload,
            status: ChangeStatus::Queued,
            attempts: 0,
            enqueued_at: now,
            next_retry_at: None,
            conflict: None,
        }
    }
}

/// Local and remote payloads surfaced to a [`crate::status::ConflictResolution`]
/// strategy or to the consumer when resolution pauses at `Custom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetails<T> {
    /// The payload this store attempted to write.
    pub local: Option<T>,
    /// The payload the backend reports as current.
    pub remote: Option<T>,
    /// Backend-assigned version/etag of the remote payload, if available.
    pub remote_version: Option<SmolStr>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}
