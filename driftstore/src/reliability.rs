//! The reliability wrapper: a lock-free circuit breaker around backend
//! calls, plus the aggregate health probe and memory-pressure hook.
//!
//! The breaker uses an `AtomicU8` state machine, a `Clock` abstraction for
//! deterministic tests, and half-open probe limiting. It wraps a
//! `driftstore_backend::Backend` call returning `Result<T, StoreError>`
//! directly — no generic error wrapper needed since the engine already has
//! one error type.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use driftstore_backend::{Backend, BackendCapabilities};
use driftstore_core::{CircuitState, HealthState, PagedResult, Query, StoreError, SyncStatus};
use tokio::sync::watch;

use crate::cache_index::CacheIndex;
use crate::config::CircuitBreakerConfig;
use crate::reactive::SubscriptionRegistry;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Clock abstraction so circuit breaker timing can be faked in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since some fixed, clock-specific epoch.
    fn now_millis(&self) -> u64;
}

/// The default clock, backed by `Instant::now()`.
#[derive(Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

struct BreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicI64,
    half_open_calls: AtomicUsize,
}

/// Wraps backend calls in a `Closed -> Open -> HalfOpen -> Closed|Open`
/// state machine. `Open` rejects calls immediately with
/// `StoreError::CircuitOpen`; `HalfOpen` admits a bounded number of probe
/// calls to decide whether to close again.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<BreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Builds a breaker from config tuning, using the monotonic wall clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            state: Arc::new(BreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicI64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Overrides the clock, for deterministic tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The current circuit state, for the health probe.
    pub fn state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }

    /// Runs `operation` through the breaker. Rejects immediately with
    /// `StoreError::CircuitOpen` while `Open` and the reset timeout hasn't
    /// elapsed, or while `HalfOpen` and the probe budget is exhausted.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
        Op: FnMut() -> Fut,
    {
        loop {
            match self.state.state.load(Ordering::Acquire) {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = (now - opened_at).max(0) as u64;
                    if elapsed >= self.config.reset_timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.state.half_open_calls.store(1, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!(),
                        }
                    } else {
                        return Err(StoreError::CircuitOpen);
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_probe_count {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(StoreError::CircuitOpen);
                    }
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!(),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;
        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn on_success(&self) {
        match self.state.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker probe failed, reopening");
                    #[cfg(feature = "metrics")]
                    metrics::counter!(*crate::metrics::STORE_CIRCUIT_TRIPS).increment(1);
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold {
                    if self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                        tracing::error!(failures, threshold = self.config.failure_threshold, "circuit breaker opened");
                        #[cfg(feature = "metrics")]
                        metrics::counter!(*crate::metrics::STORE_CIRCUIT_TRIPS).increment(1);
                    }
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> i64 {
        self.clock.now_millis() as i64
    }
}

/// Aggregates circuit state, sync status, and pending-change occupancy into
/// a single [`HealthState`], exposed as a `watch`-backed stream consumers
/// can observe without polling the facade.
pub struct HealthProbe {
    tx: tokio::sync::watch::Sender<HealthState>,
}

impl Default for HealthProbe {
    fn default() -> Self {
        HealthProbe::new()
    }
}

impl HealthProbe {
    /// Creates a probe starting at `HealthState::Healthy`.
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::watch::channel(HealthState::Healthy);
        HealthProbe { tx }
    }

    /// Subscribes to health transitions.
    pub fn stream(&self) -> tokio::sync::watch::Receiver<HealthState> {
        self.tx.subscribe()
    }

    /// Recomputes and publishes the aggregate health from current
    /// component readings. `pending_changes` is the queue's backlog size;
    /// a nonzero backlog alone only degrades health, it never makes the
    /// store unhealthy on its own (that would make ordinary offline use
    /// look like an incident).
    pub fn recompute(&self, circuit: CircuitState, sync_status: SyncStatus, pending_changes: usize) {
        let health = match (circuit, sync_status) {
            (CircuitState::Open, _) => HealthState::Unhealthy,
            (CircuitState::HalfOpen, _) => HealthState::Degraded,
            (_, SyncStatus::Error) | (_, SyncStatus::Conflict) => HealthState::Degraded,
            (_, _) if pending_changes > 0 => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
        self.tx.send_replace(health);
    }

    /// Current health reading without subscribing.
    pub fn current(&self) -> HealthState {
        *self.tx.borrow()
    }
}

/// Evicts cold cache-index entries and releases idle reactive sinks to
/// bring memory usage back under `target_entries`. Returns the number of
/// cache-index entries evicted; the reactive layer's own idle sinks are
/// released unconditionally since they carry no "target size" notion of
/// their own.
pub fn on_memory_pressure<ID, T>(
    cache_index: &CacheIndex<ID>,
    subscriptions: &SubscriptionRegistry<T, ID>,
    target_entries: usize,
) -> usize
where
    ID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    subscriptions.reap_idle();
    let stats = cache_index.stats();
    if stats.tracked_ids <= target_entries {
        return 0;
    }
    cache_index.evict_lru(stats.tracked_ids - target_entries)
}

/// Wraps a backend so that only `sync()` — the one call in this contract
/// that actually reaches across the network — passes through the circuit
/// breaker. Every other operation (`get`, `save`, `delete`, ...) is a local
/// read/write against the backend's own store and is never rejected by an
/// open circuit, matching the offline-first write policies' expectation
/// that local writes always succeed.
pub struct GuardedBackend<B> {
    inner: Arc<B>,
    circuit: CircuitBreaker,
}

impl<B> GuardedBackend<B> {
    /// Wraps `inner` behind `circuit`.
    pub fn new(inner: Arc<B>, circuit: CircuitBreaker) -> Self {
        GuardedBackend { inner, circuit }
    }

    /// The breaker guarding this backend's `sync()` calls.
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// The wrapped backend, for operations the facade wants to issue
    /// without going through the trait object (none currently, kept for
    /// symmetry with the other delegating wrappers in `driftstore-backend`).
    pub fn inner(&self) -> &Arc<B> {
        &self.inner
    }
}

#[async_trait]
impl<T, ID, B> Backend<T, ID> for GuardedBackend<B>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
{
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError> {
        self.inner.get(id).await
    }
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError> {
        self.inner.get_all(query).await
    }
    async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<T>>, StoreError> {
        self.inner.watch(id).await
    }
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<T>>, StoreError> {
        self.inner.watch_all(query).await
    }
    async fn save(&self, item: T) -> Result<T, StoreError> {
        self.inner.save(item).await
    }
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError> {
        self.inner.save_all(items).await
    }
    async fn delete(&self, id: &ID) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError> {
        self.inner.delete_all(ids).await
    }
    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError> {
        self.inner.delete_where(query).await
    }
    async fn initialize(&self) -> Result<(), StoreError> {
        self.inner.initialize().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }
    async fn sync(&self) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        self.circuit
            .execute(move || {
                let inner = Arc::clone(&inner);
                async move { inner.sync().await }
            })
            .await
    }
    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        self.inner.sync_status().await
    }
    fn sync_status_stream(&self) -> Option<watch::Receiver<SyncStatus>> {
        self.inner.sync_status_stream()
    }
    async fn pending_changes_count(&self) -> Result<usize, StoreError> {
        self.inner.pending_changes_count().await
    }
    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        self.inner.get_all_paged(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            ManualClock { now: Arc::new(AtomicU64::new(0)) }
        }
        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn config(threshold: usize, reset_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout,
            half_open_probe_count: 1,
        }
    }

    #[tokio::test]
    async fn starts_closed_and_executes_normally() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(1)));
        let result: Result<i32, StoreError> = breaker.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert!(matches!(breaker.state(), CircuitState::Closed));
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_secs(10)));
        for _ in 0..2 {
            let _: Result<i32, StoreError> = breaker.execute(|| async { Err(StoreError::Network("x".into())) }).await;
        }
        assert!(matches!(breaker.state(), CircuitState::Open));
        let result: Result<i32, StoreError> = breaker.execute(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(StoreError::CircuitOpen)));
    }

    #[tokio::test]
    async fn custom_clock_allows_controlled_recovery() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(100))).with_clock(clock.clone());
        let _: Result<i32, StoreError> = breaker.execute(|| async { Err(StoreError::Timeout) }).await;
        assert!(matches!(breaker.state(), CircuitState::Open));

        let still_open: Result<i32, StoreError> = breaker.execute(|| async { Ok(1) }).await;
        assert!(matches!(still_open, Err(StoreError::CircuitOpen)));

        clock.advance(150);
        let recovered: Result<i32, StoreError> = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(recovered.unwrap(), 7);
        assert!(matches!(breaker.state(), CircuitState::Closed));
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(100))).with_clock(clock.clone());
        let _: Result<i32, StoreError> = breaker.execute(|| async { Err(StoreError::Timeout) }).await;
        clock.advance(150);
        let _: Result<i32, StoreError> = breaker.execute(|| async { Err(StoreError::Timeout) }).await;
        assert!(matches!(breaker.state(), CircuitState::Open));
    }

    #[test]
    fn health_probe_reports_unhealthy_when_circuit_open() {
        let probe = HealthProbe::new();
        probe.recompute(CircuitState::Open, SyncStatus::Synced, 0);
        assert_eq!(probe.current(), HealthState::Unhealthy);
    }

    #[test]
    fn health_probe_reports_degraded_for_pending_backlog() {
        let probe = HealthProbe::new();
        probe.recompute(CircuitState::Closed, SyncStatus::Pending, 5);
        assert_eq!(probe.current(), HealthState::Degraded);
    }

    #[test]
    fn health_probe_reports_healthy_with_no_issues() {
        let probe = HealthProbe::new();
        probe.recompute(CircuitState::Closed, SyncStatus::Synced, 0);
        assert_eq!(probe.current(), HealthState::Healthy);
    }
}
