//! Retry backoff computation and the retry-bookkeeping interceptor.
//!
//! The backoff strategy itself is grounded on the `ninelives` pack
//! example's `Backoff` enum (`examples/flyingrobots-ninelives/src/backoff.rs`),
//! generalized from a hardcoded doubling factor to the configurable
//! `RetryConfig::factor`. The actual retry loop lives in the free function
//! [`with_retry`] rather than in `Interceptor::on_error`, since a dyn
//! `Interceptor` cannot be generic over the backend call's return type;
//! `RetryInterceptor` itself only tags context metadata and participates in
//! the chain for telemetry/tracing purposes around each individual attempt.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use driftstore_core::{OperationContext, OperationKind, StoreError};

use super::{Decision, Interceptor};
use crate::config::RetryConfig;

/// A backoff delay schedule. `Exponential` is what [`RetryConfig`] drives in
/// practice; `Constant`/`Linear` are kept for callers that want a different
/// shape without re-deriving the overflow-safe arithmetic.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant { delay: Duration },
    /// Linearly increasing delay.
    Linear { base: Duration },
    /// Exponentially increasing delay (`base * factor^(attempt-1)`), capped
    /// at `max` if set.
    Exponential {
        base: Duration,
        factor: f64,
        max: Option<Duration>,
    },
}

impl Backoff {
    /// Computes the delay for a 1-indexed attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => base
                .checked_mul(attempt.max(1))
                .unwrap_or(Duration::from_secs(u64::MAX)),
            Backoff::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.max(1.0).powi(exponent as i32);
                let nanos = (base.as_nanos() as f64 * multiplier).min(u64::MAX as f64);
                let exp_delay = Duration::from_nanos(nanos as u64);
                match max {
                    Some(cap) => exp_delay.min(*cap),
                    None => exp_delay,
                }
            }
        }
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Backoff::Exponential {
            base: config.base_delay,
            factor: config.factor,
            max: None,
        }
    }
}

/// Applies `config.jitter` to `delay`, randomizing it within
/// `[delay * (1 - jitter), delay]` using a deterministic hash of `salt`
/// rather than pulling in a dependency purely for jitter noise — callers
/// that need cryptographic-quality randomness should salt with something
/// unpredictable (e.g. a per-process nonce).
pub fn jittered(delay: Duration, jitter: f64, salt: u64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    salt.hash(&mut hasher);
    delay.hash(&mut hasher);
    let fraction = (hasher.finish() % 1_000) as f64 / 1_000.0;
    let shrink = 1.0 - jitter.clamp(0.0, 1.0) * fraction;
    Duration::from_nanos((delay.as_nanos() as f64 * shrink) as u64)
}

/// Retries `op` according to `config`, sleeping a jittered exponential
/// backoff between attempts. Only retries errors where
/// [`StoreError::is_transient`] is true; stops once `config.max_attempts`
/// is reached.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, ctx: &mut OperationContext, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let backoff = Backoff::from(config);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && ctx.attempt < config.max_attempts => {
                let delay = jittered(backoff.delay(ctx.attempt), config.jitter, ctx.attempt as u64);
                tokio::time::sleep(delay).await;
                ctx.next_attempt();
            }
            Err(err) => return Err(err),
        }
    }
}

/// Marks applicable operations for retry-eligibility bookkeeping (tracing
/// spans, attempt counters surfaced via telemetry) without performing the
/// retry loop itself — see [`with_retry`].
pub struct RetryInterceptor {
    idempotent_writes: bool,
}

impl Default for RetryInterceptor {
    fn default() -> Self {
        RetryInterceptor::new()
    }
}

impl RetryInterceptor {
    /// Retries reads only.
    pub fn new() -> Self {
        RetryInterceptor {
            idempotent_writes: false,
        }
    }

    /// Also considers `Save`/`SaveAll`/`Delete`/`DeleteAll` retry-eligible
    /// (appropriate when the write policy guarantees idempotent semantics,
    /// e.g. upsert-by-id).
    pub fn with_idempotent_writes(mut self, enabled: bool) -> Self {
        self.idempotent_writes = enabled;
        self
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "retry"
    }

    fn applies_to(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::Get | OperationKind::GetAll => true,
            OperationKind::Save | OperationKind::SaveAll | OperationKind::Delete | OperationKind::DeleteAll => {
                self.idempotent_writes
            }
            OperationKind::Sync => false,
        }
    }

    async fn on_error(&self, ctx: &OperationContext, error: &StoreError) -> Decision {
        if error.is_transient() {
            tracing::debug!(attempt = ctx.attempt, code = error.code(), "transient error observed by retry interceptor");
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_with_factor_two() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: None,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_backoff_respects_cap() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Some(Duration::from_millis(150)),
        };
        assert_eq!(backoff.delay(3), Duration::from_millis(150));
    }

    #[test]
    fn zero_jitter_returns_delay_unchanged() {
        let delay = Duration::from_millis(500);
        assert_eq!(jittered(delay, 0.0, 42), delay);
    }

    #[test]
    fn jitter_never_increases_delay() {
        let delay = Duration::from_millis(500);
        for salt in 0..20 {
            assert!(jittered(delay, 0.5, salt) <= delay);
        }
    }

    #[tokio::test]
    async fn with_retry_retries_transient_errors_up_to_max_attempts() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_attempts: 3,
            factor: 2.0,
            jitter: 0.0,
        };
        let mut ctx = OperationContext::new(OperationKind::Get);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32, StoreError> = with_retry(&config, &mut ctx, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(StoreError::Timeout) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_stops_on_non_transient_error() {
        let config = RetryConfig::default();
        let mut ctx = OperationContext::new(OperationKind::Get);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32, StoreError> = with_retry(&config, &mut ctx, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(StoreError::Validation("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
