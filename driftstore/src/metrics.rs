//! Metrics declaration and initialization.
//!
//! Counters/histograms are registered once via `lazy_static!` +
//! `describe_counter!`/`describe_histogram!`, labeled for store operations
//! (get/save/delete/sync).

#[cfg(feature = "metrics")]
use driftstore_core::OperationKind;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of store operations that resolved from the cache
    /// without consulting the backend.
    pub static ref STORE_CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "driftstore_cache_hit_count",
            "Total number of store reads resolved from cache without a backend sync."
        );
        "driftstore_cache_hit_count"
    };
    /// Track number of store operations that fell through to the backend.
    pub static ref STORE_CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "driftstore_cache_miss_count",
            "Total number of store reads that required a backend sync."
        );
        "driftstore_cache_miss_count"
    };
    /// Track number of reads served from a stale cache entry.
    pub static ref STORE_CACHE_STALE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "driftstore_cache_stale_count",
            "Total number of store reads served from a stale cache entry."
        );
        "driftstore_cache_stale_count"
    };
    /// Operation duration, labeled by operation kind and outcome.
    pub static ref STORE_OPERATION_DURATION: &'static str = {
        metrics::describe_histogram!(
            "driftstore_operation_duration_seconds",
            metrics::Unit::Seconds,
            "Store operation latency in seconds, labeled by operation and outcome."
        );
        "driftstore_operation_duration_seconds"
    };
    /// Count of backend sync calls issued by the policy executor.
    pub static ref STORE_SYNC_CALLS: &'static str = {
        metrics::describe_counter!(
            "driftstore_sync_calls_total",
            "Total number of backend sync calls issued."
        );
        "driftstore_sync_calls_total"
    };
    /// Count of operations that failed, labeled by error code.
    pub static ref STORE_ERRORS: &'static str = {
        metrics::describe_counter!(
            "driftstore_errors_total",
            "Total number of store operation failures, labeled by error code."
        );
        "driftstore_errors_total"
    };
    /// Count of conflicts surfaced by the pending-change machine.
    pub static ref STORE_CONFLICTS: &'static str = {
        metrics::describe_counter!(
            "driftstore_conflicts_total",
            "Total number of pending changes that surfaced a conflict."
        );
        "driftstore_conflicts_total"
    };
    /// Gauge of pending changes currently queued.
    pub static ref STORE_PENDING_CHANGES: &'static str = {
        metrics::describe_gauge!(
            "driftstore_pending_changes",
            "Number of pending changes currently queued or in flight."
        );
        "driftstore_pending_changes"
    };
    /// Circuit breaker trips.
    pub static ref STORE_CIRCUIT_TRIPS: &'static str = {
        metrics::describe_counter!(
            "driftstore_circuit_trips_total",
            "Total number of times the circuit breaker tripped to open."
        );
        "driftstore_circuit_trips_total"
    };

    // Offload manager metrics: this engine reuses a single background-task
    // manager for `StaleWhileRevalidate` background refresh and
    // fire-and-forget audit logging.

    /// Track number of offload tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "offload_tasks_spawned_total",
            "Total number of offload tasks spawned."
        );
        "offload_tasks_spawned_total"
    };
    /// Track number of offload tasks completed successfully.
    pub static ref OFFLOAD_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "offload_tasks_completed_total",
            "Total number of offload tasks completed successfully."
        );
        "offload_tasks_completed_total"
    };
    /// Track number of offload tasks that timed out.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "offload_tasks_timeout_total",
            "Total number of offload tasks that timed out."
        );
        "offload_tasks_timeout_total"
    };
    /// Track number of offload tasks deduplicated (skipped).
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "offload_tasks_deduplicated_total",
            "Total number of offload tasks deduplicated (skipped because already in flight)."
        );
        "offload_tasks_deduplicated_total"
    };
    /// Gauge of currently active offload tasks.
    pub static ref OFFLOAD_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "offload_tasks_active",
            "Number of currently active offload tasks."
        );
        "offload_tasks_active"
    };
    /// Histogram of offload task duration.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of offload tasks in seconds."
        );
        "offload_task_duration_seconds"
    };
}

/// Stable label for an [`OperationKind`], used across every metric emitted
/// by the facade and telemetry interceptor.
#[cfg(feature = "metrics")]
pub fn operation_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Get => "get",
        OperationKind::GetAll => "get_all",
        OperationKind::Save => "save",
        OperationKind::SaveAll => "save_all",
        OperationKind::Delete => "delete",
        OperationKind::DeleteAll => "delete_all",
        OperationKind::Sync => "sync",
    }
}

#[cfg(not(feature = "metrics"))]
#[inline]
#[allow(dead_code)]
pub(crate) fn metrics_disabled() {}
