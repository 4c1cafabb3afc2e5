//! Store configuration: policy selection, retry/circuit tuning, and the
//! interceptor chain's ordered list.
//!
//! Built via a fluent [`StoreConfigBuilder`] over a concrete field set —
//! every setter takes `self` by value so calls chain, and unset fields
//! simply inherit the [`StoreConfig::defaults`] preset.

use std::sync::Arc;
use std::time::Duration;

use driftstore_core::{ConflictResolution, FetchPolicy, SyncMode, WritePolicy};
use serde::{Deserialize, Serialize};

use crate::interceptor::Interceptor;

/// Base delay, attempt cap, backoff factor, and jitter for both the
/// pending-change retry scheduler and the `RetryInterceptor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Retries beyond this count settle at a terminal `Failed` state.
    pub max_attempts: u32,
    /// Multiplier applied to `base_delay` on each subsequent attempt.
    pub factor: f64,
    /// Fraction of the computed delay to randomize away (0.0 disables
    /// jitter), avoiding synchronized retry storms across many entities.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay: Duration::from_millis(200),
            max_attempts: 5,
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

/// Eviction strategy the cache index uses when `on_memory_pressure` must
/// shed entries to reach a target size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub enum EvictionStrategy {
    /// Drop the least-recently-fetched entries first.
    #[default]
    Lru,
    /// Drop entries in arbitrary (index-iteration) order; cheapest, least
    /// considerate.
    Arbitrary,
}

/// Soft limits the reliability wrapper's memory-pressure hook enforces
/// against the cache metadata index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Evict cold entries once the tracked id count exceeds this.
    pub max_entries: Option<usize>,
    /// Advisory byte budget; the engine does not mirror entity bytes, so
    /// this is only meaningful to a backend that reports its own footprint.
    pub max_bytes: Option<usize>,
    /// Which entries to evict first when a limit is exceeded.
    pub eviction: EvictionStrategy,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            max_entries: None,
            max_bytes: None,
            eviction: EvictionStrategy::default(),
        }
    }
}

/// Failure threshold, cool-down, and half-open probe budget for the
/// reliability wrapper's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit trips to `Open`.
    pub failure_threshold: usize,
    /// How long `Open` holds before allowing a `HalfOpen` probe.
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Concurrent probe calls permitted while `HalfOpen`.
    pub half_open_probe_count: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_probe_count: 1,
        }
    }
}

/// The full set of tunables a [`crate::store::Store`] is constructed with.
///
/// Always built in-process via [`StoreConfig::builder`] or a named preset —
/// loading configuration from an external file is out of scope for this
/// crate.
#[derive(Clone)]
pub struct StoreConfig {
    /// Default read policy for `get`/`get_all` when the caller passes `None`.
    pub fetch_policy: FetchPolicy,
    /// Default write policy for `save`/`delete` when the caller passes
    /// `None`.
    pub write_policy: WritePolicy,
    /// How the pending-change queue is scheduled for draining.
    pub sync_mode: SyncMode,
    /// Strategy selected when a backend reports a write conflict.
    pub conflict_resolution: ConflictResolution,
    /// Retry tuning shared by the pending-change scheduler and the retry
    /// interceptor.
    pub retry_config: RetryConfig,
    /// Age at which a cache-index entry is considered stale. `None` means
    /// entries are never stale.
    pub stale_duration: Option<Duration>,
    /// Interval for `SyncMode::Periodic`. Ignored otherwise.
    pub sync_interval: Option<Duration>,
    /// Whether the facade emits an audit record after every operation.
    pub enable_audit_logging: bool,
    /// Whether GDPR-relevant operations (export/erase) are exposed. The
    /// storage for these remains an out-of-scope collaborator.
    pub enable_gdpr: bool,
    /// Soft memory limits enforced by the reliability wrapper.
    pub cache_config: CacheLimits,
    /// Circuit breaker tuning.
    pub circuit_breaker_config: CircuitBreakerConfig,
    /// Ordered interceptor chain, visited forward on request and reverse on
    /// response/error.
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("fetch_policy", &self.fetch_policy)
            .field("write_policy", &self.write_policy)
            .field("sync_mode", &self.sync_mode)
            .field("conflict_resolution", &self.conflict_resolution)
            .field("stale_duration", &self.stale_duration)
            .field("sync_interval", &self.sync_interval)
            .field("enable_audit_logging", &self.enable_audit_logging)
            .field("enable_gdpr", &self.enable_gdpr)
            .field("interceptor_count", &self.interceptors.len())
            .finish()
    }
}

impl StoreConfig {
    /// Starts a builder seeded with [`StoreConfig::defaults`].
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Balanced defaults: cache-first reads, cache-and-network writes,
    /// manual sync, no stale window.
    pub fn defaults() -> Self {
        StoreConfig {
            fetch_policy: FetchPolicy::CacheFirst,
            write_policy: WritePolicy::CacheAndNetwork,
            sync_mode: SyncMode::Manual,
            conflict_resolution: ConflictResolution::Custom,
            retry_config: RetryConfig::default(),
            stale_duration: None,
            sync_interval: None,
            enable_audit_logging: false,
            enable_gdpr: false,
            cache_config: CacheLimits::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
            interceptors: Vec::new(),
        }
    }

    /// Tuned for disconnected-first consumers: cache-first reads with a
    /// generous stale window, cache-first writes that never block on sync,
    /// and realtime sync scheduling so a reconnect drains the queue
    /// promptly.
    pub fn offline_first() -> Self {
        StoreConfig {
            fetch_policy: FetchPolicy::CacheFirst,
            write_policy: WritePolicy::CacheFirst,
            sync_mode: SyncMode::Realtime,
            conflict_resolution: ConflictResolution::LatestWins,
            stale_duration: Some(Duration::from_secs(300)),
            ..StoreConfig::defaults()
        }
    }

    /// Tuned for consumers with no offline requirement: every read and
    /// write goes straight to the backend, conflicts are resolved by
    /// deferring to the server.
    pub fn online_only() -> Self {
        StoreConfig {
            fetch_policy: FetchPolicy::NetworkOnly,
            write_policy: WritePolicy::NetworkFirst,
            sync_mode: SyncMode::Manual,
            conflict_resolution: ConflictResolution::ServerWins,
            stale_duration: None,
            ..StoreConfig::defaults()
        }
    }

    /// Tuned for backends that push server-initiated changes: cache-and-
    /// network reads so subscribers see both the cached and refreshed
    /// value, realtime sync scheduling, CRDT-delegated conflict handling.
    pub fn realtime() -> Self {
        StoreConfig {
            fetch_policy: FetchPolicy::CacheAndNetwork,
            write_policy: WritePolicy::CacheAndNetwork,
            sync_mode: SyncMode::Realtime,
            conflict_resolution: ConflictResolution::Crdt,
            stale_duration: Some(Duration::from_secs(30)),
            ..StoreConfig::defaults()
        }
    }
}

/// Builder for [`StoreConfig`]. Every setter takes `self` by value so calls
/// chain; unset fields inherit [`StoreConfig::defaults`].
#[derive(Clone)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConfigBuilder {
    /// Starts from [`StoreConfig::defaults`].
    pub fn new() -> Self {
        StoreConfigBuilder {
            config: StoreConfig::defaults(),
        }
    }

    /// Starts from an existing preset, to override just a few fields.
    pub fn from_preset(preset: StoreConfig) -> Self {
        StoreConfigBuilder { config: preset }
    }

    /// Sets the default fetch policy.
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.fetch_policy = policy;
        self
    }

    /// Sets the default write policy.
    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.config.write_policy = policy;
        self
    }

    /// Sets the sync scheduling mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.config.sync_mode = mode;
        self
    }

    /// Sets the conflict resolution strategy.
    pub fn conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.config.conflict_resolution = resolution;
        self
    }

    /// Sets the retry tuning.
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry_config = retry;
        self
    }

    /// Sets the staleness window. `None` means entries are never stale.
    pub fn stale_duration(mut self, duration: Option<Duration>) -> Self {
        self.config.stale_duration = duration;
        self
    }

    /// Sets the periodic sync interval.
    pub fn sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.sync_interval = interval;
        self
    }

    /// Enables or disables fire-and-forget audit logging after each
    /// operation.
    pub fn enable_audit_logging(mut self, enabled: bool) -> Self {
        self.config.enable_audit_logging = enabled;
        self
    }

    /// Enables or disables GDPR-relevant operation exposure.
    pub fn enable_gdpr(mut self, enabled: bool) -> Self {
        self.config.enable_gdpr = enabled;
        self
    }

    /// Sets the cache-index memory limits.
    pub fn cache_config(mut self, limits: CacheLimits) -> Self {
        self.config.cache_config = limits;
        self
    }

    /// Sets the circuit breaker tuning.
    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker_config = config;
        self
    }

    /// Appends an interceptor to the end of the chain (visited last on
    /// request, first on response/error).
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.config.interceptors.push(interceptor);
        self
    }

    /// Replaces the whole interceptor chain.
    pub fn interceptors(mut self, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        self.config.interceptors = interceptors;
        self
    }

    /// Builds the final, immutable [`StoreConfig`].
    pub fn build(self) -> StoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_cache_first_manual_sync() {
        let config = StoreConfig::defaults();
        assert!(matches!(config.fetch_policy, FetchPolicy::CacheFirst));
        assert!(matches!(config.sync_mode, SyncMode::Manual));
    }

    #[test]
    fn offline_first_never_blocks_writes_on_sync() {
        let config = StoreConfig::offline_first();
        assert!(matches!(config.write_policy, WritePolicy::CacheFirst));
        assert!(config.stale_duration.is_some());
    }

    #[test]
    fn builder_overrides_preset_fields() {
        let config = StoreConfigBuilder::from_preset(StoreConfig::online_only())
            .enable_audit_logging(true)
            .build();
        assert!(matches!(config.fetch_policy, FetchPolicy::NetworkOnly));
        assert!(config.enable_audit_logging);
    }
}
