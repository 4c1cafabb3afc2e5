//! Plain status and policy enums shared across the engine.
//!
//! These are intentionally dependency-free value types: every layer above
//! `driftstore-core` matches on them, but none of them carry behavior of
//! their own.

use serde::{Deserialize, Serialize};

/// Store-level synchronization status, derived from the pending-change queue
/// occupancy and the outcome of the last backend sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum SyncStatus {
    /// The pending-change queue is empty and the last sync succeeded.
    #[default]
    Synced,
    /// The queue has entries but no drain is currently in progress.
    Pending,
    /// An in-flight drain of the pending-change queue is underway.
    Syncing,
    /// All currently in-flight changes failed transiently.
    Error,
    /// Sync was explicitly paused by the consumer.
    Paused,
    /// At least one pending change is in the `Conflicting` state.
    Conflict,
}

/// Strategy controlling the ordering of cache and network reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum FetchPolicy {
    /// Read cache first; fall back to a backend sync only when stale/absent.
    #[default]
    CacheFirst,
    /// Sync with the backend first; fall back to cache on failure.
    NetworkFirst,
    /// Return the cache immediately, sync in parallel, and let reactive
    /// subscribers observe the refreshed value.
    CacheAndNetwork,
    /// Never sync; return whatever the backend's local read produces.
    CacheOnly,
    /// Always sync before reading; propagate sync failures.
    NetworkOnly,
    /// Return cache immediately and revalidate in the background
    /// (stale-while-revalidate). Syncs synchronously when nothing is cached.
    StaleWhileRevalidate,
}

/// Strategy controlling the ordering of local writes and backend sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum WritePolicy {
    /// Write locally, then sync; sync failures propagate but the local
    /// write survives.
    #[default]
    CacheAndNetwork,
    /// Write locally, then sync synchronously; any failure propagates.
    NetworkFirst,
    /// Write locally and sync in the background; sync failures never
    /// propagate to the caller.
    CacheFirst,
    /// Write locally only; never sync.
    CacheOnly,
}

/// How a conflicting pending change is resolved when the backend reports a
/// version mismatch on apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum ConflictResolution {
    /// Drop the local change; keep the remote value.
    ServerWins,
    /// Re-submit the local change with a forced-overwrite flag.
    ClientWins,
    /// Whichever payload carries the newer timestamp wins.
    LatestWins,
    /// Call a user-supplied combiner to merge local and remote payloads.
    Merge,
    /// Delegate resolution to the backend's own CRDT merge.
    Crdt,
    /// Pause at `Conflicting` until the consumer explicitly retries with a
    /// replacement payload.
    #[default]
    Custom,
}

/// How the store schedules backend synchronization of pending changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum SyncMode {
    /// Sync as soon as the backend pushes or a change is enqueued.
    Realtime,
    /// Sync on a fixed interval (`StoreConfig::sync_interval`).
    Periodic,
    /// Sync only when `Store::sync()` is called explicitly.
    #[default]
    Manual,
    /// Sync in response to external events (e.g. connectivity regained).
    EventDriven,
    /// Never sync automatically.
    Disabled,
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum CircuitState {
    /// Calls pass through; failures increment the rolling counter.
    #[default]
    Closed,
    /// Calls fail immediately with `StoreError::CircuitOpen`.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

/// Aggregate health produced by the reliability wrapper's health probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum HealthState {
    /// Circuit closed, last sync ok, no surfaced conflicts.
    #[default]
    Healthy,
    /// Circuit half-open, or pending changes are piling up.
    Degraded,
    /// Circuit open, or the backend is otherwise unusable.
    Unhealthy,
}

/// Store lifecycle. Every facade call checks this before doing any work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum StoreLifecycle {
    /// Created but `initialize()` has not yet completed.
    #[default]
    Uninitialized,
    /// Accepting operations.
    Ready,
    /// `close()` has completed; all further operations fail.
    Disposed,
}
