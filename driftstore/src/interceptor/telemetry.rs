//! Telemetry interceptor: duration/outcome recording via `metrics.rs`'s
//! counters/histograms plus an out-of-scope [`Reporter`] sink for consumers
//! that want structured events beyond Prometheus-style metrics.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use driftstore_core::{OperationContext, OperationKind, StoreError};

use super::{Decision, Interceptor, Outcome};

/// External sink for store-operation events. A no-op collaborator
/// interface — concrete implementations (structured log shipping, OTel
/// spans, a product-analytics pipeline) are out of scope for this crate,
/// same as `AuditSink` in `store.rs`.
pub trait Reporter: Send + Sync {
    /// Called once per completed operation, success or failure.
    fn report(&self, operation: OperationKind, attempt: u32, duration: std::time::Duration, outcome_code: &str);
}

/// A `Reporter` that only emits `tracing` events, used when no external
/// sink is configured.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, operation: OperationKind, attempt: u32, duration: std::time::Duration, outcome_code: &str) {
        tracing::info!(
            ?operation,
            attempt,
            duration_ms = duration.as_millis() as u64,
            outcome = outcome_code,
            "store operation completed"
        );
    }
}

/// Records operation duration and outcome via both `metrics.rs`'s
/// lazy-static counters/histograms and a pluggable [`Reporter`].
///
/// Timing starts at `on_request` and is attributed at `on_response`/
/// `on_error`; since those run in reverse chain order, placing this
/// interceptor first in the configured list measures the full operation
/// including every other interceptor's own overhead.
pub struct TelemetryInterceptor {
    reporter: Arc<dyn Reporter>,
    start_key: &'static str,
}

impl Default for TelemetryInterceptor {
    fn default() -> Self {
        TelemetryInterceptor::new(Arc::new(TracingReporter))
    }
}

impl TelemetryInterceptor {
    /// Builds a telemetry interceptor reporting to `reporter`.
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        TelemetryInterceptor {
            reporter,
            start_key: "telemetry_start_nanos",
        }
    }

    fn elapsed(&self, ctx: &OperationContext) -> std::time::Duration {
        ctx.get_meta(self.start_key)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|started_nanos| {
                let now_nanos = nanos_since_process_start();
                std::time::Duration::from_nanos(now_nanos.saturating_sub(started_nanos))
            })
            .unwrap_or_default()
    }
}

// `OperationContext` carries only string metadata, so elapsed time is
// threaded through as a monotonic nanosecond count rather than an
// `Instant` (which has no stable string representation). The process-wide
// reference point is established once via `std::sync::OnceLock`.
fn process_start() -> Instant {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn nanos_since_process_start() -> u64 {
    process_start().elapsed().as_nanos() as u64
}

#[async_trait]
impl Interceptor for TelemetryInterceptor {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn on_request(&self, ctx: &mut OperationContext) -> Decision {
        ctx.set_meta(self.start_key, nanos_since_process_start().to_string());
        Decision::Continue
    }

    async fn on_response(&self, ctx: &OperationContext, _outcome: &Outcome) -> Decision {
        let duration = self.elapsed(ctx);
        #[cfg(feature = "metrics")]
        {
            metrics::histogram!(
                *crate::metrics::STORE_OPERATION_DURATION,
                "operation" => crate::metrics::operation_label(ctx.operation),
                "outcome" => "ok"
            )
            .record(duration.as_secs_f64());
        }
        self.reporter.report(ctx.operation, ctx.attempt, duration, "ok");
        Decision::Continue
    }

    async fn on_error(&self, ctx: &OperationContext, error: &StoreError) -> Decision {
        let duration = self.elapsed(ctx);
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(*crate::metrics::STORE_ERRORS, "code" => error.code()).increment(1);
            metrics::histogram!(
                *crate::metrics::STORE_OPERATION_DURATION,
                "operation" => crate::metrics::operation_label(ctx.operation),
                "outcome" => "error"
            )
            .record(duration.as_secs_f64());
        }
        self.reporter.report(ctx.operation, ctx.attempt, duration, error.code());
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingReporter {
        events: Mutex<Vec<(OperationKind, String)>>,
    }

    impl Reporter for RecordingReporter {
        fn report(&self, operation: OperationKind, _attempt: u32, _duration: std::time::Duration, outcome_code: &str) {
            self.events.lock().unwrap().push((operation, outcome_code.to_string()));
        }
    }

    #[tokio::test]
    async fn records_success_event() {
        let reporter = Arc::new(RecordingReporter { events: Mutex::new(Vec::new()) });
        let interceptor = TelemetryInterceptor::new(reporter.clone());
        let mut ctx = OperationContext::new(OperationKind::Get);
        interceptor.on_request(&mut ctx).await;
        interceptor.on_response(&ctx, &Outcome::new(1i32)).await;
        let events = reporter.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "ok");
    }

    #[tokio::test]
    async fn records_error_event_with_code() {
        let reporter = Arc::new(RecordingReporter { events: Mutex::new(Vec::new()) });
        let interceptor = TelemetryInterceptor::new(reporter.clone());
        let mut ctx = OperationContext::new(OperationKind::Save);
        interceptor.on_request(&mut ctx).await;
        interceptor.on_error(&ctx, &StoreError::NotFound).await;
        let events = reporter.events.lock().unwrap();
        assert_eq!(events[0].1, "not_found");
    }
}
