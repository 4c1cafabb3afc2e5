//! The pending-change/sync machine: the FIFO queue of local mutations
//! awaiting backend application, its retry scheduling, and conflict
//! resolution.
//!
//! An explicit state per [`ChangeStatus`] variant, with transitions
//! enforced here rather than in the data type itself
//! (`driftstore_core::change`). The queue storage and retry-due scanning
//! use the same `DashMap` idiom as [`crate::cache_index::CacheIndex`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use driftstore_core::{
    ChangeKind, ChangeStatus, ConflictDetails, ConflictResolution, FieldAccessor, FieldValue,
    PendingChange, StoreError, SyncStatus,
};
use tokio::sync::watch;

use crate::interceptor::retry::Backoff;

/// What the conflict resolver decided to do with a `Conflicting` change.
pub enum ConflictOutcome<T> {
    /// Re-submit this payload to the backend.
    Reapply(T),
    /// Drop the local change; the remote value already reflects reality.
    DropLocal,
    /// Leave the change `Conflicting`, awaiting an explicit consumer
    /// decision (the `Custom` strategy, or a strategy that isn't viable
    /// given the backend's capabilities).
    Defer,
}

/// Resolves a conflict per `strategy`, given the details the backend
/// reported and (for `LatestWins`) a field accessor used to compare
/// `updated_at`-style fields without this layer inspecting `T` directly.
///
/// `ClientWins` without `supports_force_overwrite` falls back to `Defer`
/// since resubmitting would just
/// reproduce the same conflict.
pub fn resolve_conflict<T: Clone>(
    strategy: ConflictResolution,
    details: &ConflictDetails<T>,
    accessor: Option<&dyn FieldAccessor<T>>,
    merge_fn: Option<&(dyn Fn(&T, &T) -> T + Send + Sync)>,
    supports_force_overwrite: bool,
) -> ConflictOutcome<T> {
    match strategy {
        ConflictResolution::ServerWins => ConflictOutcome::DropLocal,
        ConflictResolution::ClientWins => match (&details.local, supports_force_overwrite) {
            (Some(local), true) => ConflictOutcome::Reapply(local.clone()),
            _ => ConflictOutcome::Defer,
        },
        ConflictResolution::LatestWins => match (&details.local, &details.remote, accessor) {
            (Some(local), Some(remote), Some(accessor)) => {
                let local_ts = accessor.get(local, "updated_at");
                let remote_ts = accessor.get(remote, "updated_at");
                match (local_ts, remote_ts) {
                    (Some(l), Some(r)) if matches!(l.compare(&r), Some(std::cmp::Ordering::Greater)) => {
                        ConflictOutcome::Reapply(local.clone())
                    }
                    (Some(_), Some(_)) => ConflictOutcome::DropLocal,
                    _ => ConflictOutcome::Defer,
                }
            }
            (Some(local), None, _) => ConflictOutcome::Reapply(local.clone()),
            _ => ConflictOutcome::Defer,
        },
        ConflictResolution::Merge => match (&details.local, &details.remote, merge_fn) {
            (Some(local), Some(remote), Some(merge)) => ConflictOutcome::Reapply(merge(local, remote)),
            _ => ConflictOutcome::Defer,
        },
        ConflictResolution::Crdt => match &details.local {
            Some(local) => ConflictOutcome::Reapply(local.clone()),
            None => ConflictOutcome::Defer,
        },
        ConflictResolution::Custom => ConflictOutcome::Defer,
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PendingQueueStats {
    /// Entries waiting for a drain to pick them up.
    pub queued: usize,
    /// Entries currently being applied.
    pub in_flight: usize,
    /// Entries that exhausted retries.
    pub failed: usize,
    /// Entries awaiting conflict resolution.
    pub conflicting: usize,
}

/// FIFO queue of local mutations awaiting backend application, keyed by
/// entity id (a later change for the same id coalesces with — replaces —
/// an earlier unsynced one, same as most offline-first stores: there is
/// never a reason to replay two writes to the same id out of order when
/// only the latest matters).
pub struct PendingChangeQueue<T, ID> {
    entries: DashMap<ID, PendingChange<T, ID>>,
    sequence: AtomicU64,
    status_tx: watch::Sender<SyncStatus>,
}

impl<T, ID> Default for PendingChangeQueue<T, ID>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        PendingChangeQueue::new()
    }
}

impl<T, ID> PendingChangeQueue<T, ID>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
{
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Synced);
        PendingChangeQueue {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            status_tx,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Enqueues a create/replace, coalescing with any unsynced change
    /// already queued for `id`.
    pub fn enqueue_save(&self, id: ID, payload: T, now: DateTime<Utc>) {
        let sequence = self.next_sequence();
        self.entries
            .insert(id.clone(), PendingChange::new(sequence, id, ChangeKind::Save, Some(payload), now));
        self.recompute_status();
    }

    /// Enqueues a delete, coalescing with any unsynced change already
    /// queued for `id`.
    pub fn enqueue_delete(&self, id: ID, now: DateTime<Utc>) {
        let sequence = self.next_sequence();
        self.entries
            .insert(id.clone(), PendingChange::new(sequence, id, ChangeKind::Delete, None, now));
        self.recompute_status();
    }

    /// The change currently queued for `id`, if any.
    pub fn get(&self, id: &ID) -> Option<PendingChange<T, ID>> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Total entries regardless of status.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries eligible for a drain right now: `Queued`, or `Failed` with
    /// `next_retry_at <= now`. Returned in FIFO (sequence) order.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ID> {
        let mut due: Vec<(u64, ID)> = self
            .entries
            .iter()
            .filter(|e| match e.status {
                ChangeStatus::Queued => true,
                ChangeStatus::Failed => e.next_retry_at.is_none_or(|at| at <= now),
                _ => false,
            })
            .map(|e| (e.sequence, e.key().clone()))
            .collect();
        due.sort_by_key(|(seq, _)| *seq);
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Marks `id` as currently being applied.
    pub fn mark_in_flight(&self, id: &ID) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ChangeStatus::InFlight;
            entry.attempts += 1;
        }
        self.recompute_status();
    }

    /// Marks `id` synced and removes it from the queue.
    pub fn mark_synced(&self, id: &ID) {
        self.entries.remove(id);
        self.recompute_status();
    }

    /// Marks `id` failed and schedules its next retry using an
    /// exponential backoff over `attempts`.
    pub fn mark_failed(&self, id: &ID, backoff: &Backoff, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ChangeStatus::Failed;
            let delay = backoff.delay(entry.attempts.max(1));
            entry.next_retry_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
        }
        self.recompute_status();
    }

    /// Marks `id` as permanently failed (retries exhausted); it stays in
    /// the queue for visibility until the consumer removes it explicitly.
    pub fn mark_exhausted(&self, id: &ID) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ChangeStatus::Failed;
            entry.next_retry_at = None;
        }
        self.recompute_status();
    }

    /// Marks `id` conflicting with the reported details.
    pub fn mark_conflicting(&self, id: &ID, details: ConflictDetails<T>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ChangeStatus::Conflicting;
            entry.conflict = Some(details);
        }
        self.recompute_status();
    }

    /// Re-queues a previously conflicting change with a replacement
    /// payload (the consumer's explicit resolution under
    /// `ConflictResolution::Custom`), or with the resolver's own decision.
    pub fn requeue(&self, id: &ID, payload: T, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ChangeStatus::Queued;
            entry.kind = ChangeKind::Save;
            entry.payload = Some(payload);
            entry.conflict = None;
            entry.next_retry_at = None;
            entry.enqueued_at = now;
        }
        self.recompute_status();
    }

    /// Drops `id` from the queue unconditionally (e.g. the consumer
    /// discards a conflicting or failed change).
    pub fn discard(&self, id: &ID) {
        self.entries.remove(id);
        self.recompute_status();
    }

    /// All changes currently awaiting conflict resolution.
    pub fn conflicts(&self) -> Vec<PendingChange<T, ID>> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, ChangeStatus::Conflicting))
            .map(|e| e.clone())
            .collect()
    }

    /// Point-in-time counts by status.
    pub fn stats(&self) -> PendingQueueStats {
        let mut stats = PendingQueueStats::default();
        for entry in self.entries.iter() {
            match entry.status {
                ChangeStatus::Queued => stats.queued += 1,
                ChangeStatus::InFlight => stats.in_flight += 1,
                ChangeStatus::Failed => stats.failed += 1,
                ChangeStatus::Conflicting => stats.conflicting += 1,
                ChangeStatus::Synced => {}
            }
        }
        stats
    }

    /// Current derived `SyncStatus`. Precedence:
    /// any conflict outranks any error, which outranks in-flight activity,
    /// which outranks a merely non-empty queue.
    pub fn status(&self) -> SyncStatus {
        *self.status_tx.borrow()
    }

    /// Subscribes to `SyncStatus` transitions.
    pub fn status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    fn recompute_status(&self) {
        let stats = self.stats();
        let status = if stats.conflicting > 0 {
            SyncStatus::Conflict
        } else if stats.in_flight > 0 {
            SyncStatus::Syncing
        } else if stats.failed > 0 {
            SyncStatus::Error
        } else if stats.queued > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        self.status_tx.send_replace(status);
    }
}

/// Type-erased merge combiner for `ConflictResolution::Merge`, stored
/// alongside a queue since `dyn Fn` needs a concrete home per entity type
/// (unlike `Interceptor`, this is never shared across different `T`s).
pub type MergeFn<T> = Arc<dyn Fn(&T, &T) -> T + Send + Sync>;
