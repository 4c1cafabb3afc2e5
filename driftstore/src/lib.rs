#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Cache-freshness tracking and tag-based invalidation.
///
/// [`CacheIndex`](cache_index::CacheIndex) records the last-fetch time and
/// tag memberships for every tracked id, independent of any payload
/// storage — the payload itself lives with the backend.
pub mod cache_index;

/// Store configuration: fetch/write policies, retry and circuit-breaker
/// tuning, and the interceptor chain.
///
/// [`StoreConfig`](config::StoreConfig) is built via
/// [`StoreConfigBuilder`](config::StoreConfigBuilder), starting from one of
/// four presets (`defaults`, `offline_first`, `online_only`, `realtime`).
pub mod config;

/// Request-lifecycle middleware: deduplication, retry, and telemetry.
///
/// An [`Interceptor`](interceptor::Interceptor) observes (and can
/// short-circuit) every operation the facade runs. See
/// [`InterceptorChain`](interceptor::InterceptorChain) for the visiting
/// order.
pub mod interceptor;

/// Metrics collection for store observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for cache hits/misses/staleness, operation duration,
/// sync calls, errors, conflicts, pending-change backlog, and circuit
/// trips.
pub mod metrics;

/// Background task offloading for fire-and-forget sync, revalidation, and
/// audit work.
///
/// [`OffloadManager`](offload::OffloadManager) implements
/// `driftstore_core::Offload` and is the collaborator every
/// `staleWhileRevalidate` background refresh, `cacheFirst` background
/// sync, and audit-log call is spawned through.
pub mod offload;

/// The pending-change queue: the local write log drained by `Store::sync`.
///
/// Tracks every locally-applied write or delete that hasn't yet been
/// confirmed against the backend, plus the conflict-resolution decision
/// table in [`resolve_conflict`](pending::resolve_conflict).
pub mod pending;

/// Pure fetch/write policy execution functions.
///
/// [`policy::fetch::execute`]/[`policy::fetch::execute_all`] and
/// [`policy::write::execute_save`]/[`policy::write::execute_delete`] (and
/// their batch forms) implement the per-[`FetchPolicy`](driftstore_core::FetchPolicy)/
/// [`WritePolicy`](driftstore_core::WritePolicy) decision tables. Stateless:
/// they take the backend and offload collaborator as arguments and never
/// retry themselves.
pub mod policy;

/// The reactive subscription layer: latest-value streams per id and per
/// query.
///
/// [`SubscriptionRegistry`](reactive::SubscriptionRegistry) backs
/// `Store::watch`/`Store::watch_all`.
pub mod reactive;

/// Circuit breaking and health aggregation around a backend.
///
/// [`GuardedBackend`](reliability::GuardedBackend) wraps any
/// `driftstore_backend::Backend` and routes its `sync()` calls through a
/// [`CircuitBreaker`](reliability::CircuitBreaker); [`HealthProbe`](reliability::HealthProbe)
/// aggregates circuit state, sync status, and pending-change backlog into
/// a single [`HealthState`](driftstore_core::HealthState) stream.
pub mod reliability;

/// The store facade.
///
/// [`Store`](store::Store) is the single entry point consumers hold: a
/// cheaply-`Clone`-able handle wiring together the cache index, reactive
/// layer, pending-change queue, policy executor, interceptor chain, and
/// reliability wrapper.
pub mod store;

pub use cache_index::{CacheIndex, CacheIndexStats};
pub use config::{
    CacheLimits, CircuitBreakerConfig, EvictionStrategy, RetryConfig, StoreConfig,
    StoreConfigBuilder,
};
pub use interceptor::{Decision, Interceptor, InterceptorChain, Outcome};
pub use offload::{OffloadConfig, OffloadConfigBuilder, OffloadHandle, OffloadKey, OffloadManager};
pub use pending::{ConflictOutcome, MergeFn, PendingChangeQueue, PendingQueueStats, resolve_conflict};
pub use reactive::SubscriptionRegistry;
pub use reliability::{CircuitBreaker, Clock, GuardedBackend, HealthProbe, MonotonicClock};
pub use store::{AuditSink, Store, StoreBuilder};

/// The `driftstore` prelude.
///
/// ```rust
/// use driftstore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{AuditSink, Store, StoreBuilder, StoreConfig, StoreConfigBuilder};
    pub use driftstore_backend::Backend;
    pub use driftstore_core::{FetchPolicy, Query, Tag, WritePolicy};
}
