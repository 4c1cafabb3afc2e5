//! Request deduplication/coalescing interceptor.
//!
//! Keyed by `(operation-kind, fingerprint-of-request)`: the first caller for
//! a given key proceeds, concurrent callers for the same key subscribe to a
//! broadcast channel and replay the first caller's result instead of each
//! issuing their own backend call.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use driftstore_core::{OperationContext, OperationKind, StoreError};
use smol_str::SmolStr;
use tokio::sync::broadcast;

use super::{Decision, Interceptor, Outcome};

const DEDUP_META_KEY: &str = "dedup_key";
const BROADCAST_CAPACITY: usize = 16;

#[derive(Clone, Eq, PartialEq, Hash)]
struct DedupKey {
    operation: OperationKind,
    key: SmolStr,
}

/// Coalesces concurrent operations sharing the same dedup key (set via
/// `ctx.set_meta("dedup_key", ..)` by the caller — typically the entity id
/// or a query fingerprint) so only the first issues the underlying call.
///
/// Only applies to read operations (`Get`/`GetAll`) by default: deduping
/// writes would silently drop distinct caller intents.
pub struct DedupInterceptor {
    in_flight: DashMap<DedupKey, broadcast::Sender<DedupOutcome>>,
}

#[derive(Clone)]
enum DedupOutcome {
    Ok(Outcome),
    Err(StoreErrorLabel),
}

/// `StoreError` is not `Clone` (it wraps `Box<dyn Error>`), so a
/// deduplicated failure is replayed to waiters as a stable, clonable label
/// rather than the original error.
#[derive(Clone)]
struct StoreErrorLabel(&'static str);

impl Default for DedupInterceptor {
    fn default() -> Self {
        DedupInterceptor::new()
    }
}

impl DedupInterceptor {
    /// Creates an empty dedup table.
    pub fn new() -> Self {
        DedupInterceptor {
            in_flight: DashMap::new(),
        }
    }

    /// Currently in-flight dedup keys, for diagnostics/tests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn key_for(ctx: &OperationContext) -> Option<DedupKey> {
        ctx.get_meta(DEDUP_META_KEY).map(|k| DedupKey {
            operation: ctx.operation,
            key: SmolStr::new(k),
        })
    }
}

#[async_trait]
impl Interceptor for DedupInterceptor {
    fn name(&self) -> &str {
        "dedup"
    }

    fn applies_to(&self, operation: OperationKind) -> bool {
        matches!(operation, OperationKind::Get | OperationKind::GetAll)
    }

    async fn on_request(&self, ctx: &mut OperationContext) -> Decision {
        let Some(key) = Self::key_for(ctx) else {
            return Decision::Continue;
        };
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => {
                let mut receiver = entry.get().subscribe();
                drop(entry);
                match receiver.recv().await {
                    Ok(DedupOutcome::Ok(outcome)) => Decision::ShortCircuit(outcome),
                    Ok(DedupOutcome::Err(label)) => {
                        Decision::Error(StoreError::Internal(format!(
                            "deduplicated request failed: {}",
                            label.0
                        )))
                    }
                    Err(_) => Decision::Continue,
                }
            }
            Entry::Vacant(entry) => {
                let (sender, _receiver) = broadcast::channel(BROADCAST_CAPACITY);
                entry.insert(sender);
                ctx.set_meta("dedup_leader", "true");
                Decision::Continue
            }
        }
    }

    async fn on_response(&self, ctx: &OperationContext, outcome: &Outcome) -> Decision {
        if ctx.get_meta("dedup_leader") == Some("true") {
            if let Some(key) = Self::key_for(ctx) {
                if let Some((_, sender)) = self.in_flight.remove(&key) {
                    let _ = sender.send(DedupOutcome::Ok(outcome.clone()));
                }
            }
        }
        Decision::Continue
    }

    async fn on_error(&self, ctx: &OperationContext, error: &StoreError) -> Decision {
        if ctx.get_meta("dedup_leader") == Some("true") {
            if let Some(key) = Self::key_for(ctx) {
                if let Some((_, sender)) = self.in_flight.remove(&key) {
                    let _ = sender.send(DedupOutcome::Err(StoreErrorLabel(error.code())));
                }
            }
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_core::OperationKind;

    #[tokio::test]
    async fn leader_clears_in_flight_entry_on_response() {
        let interceptor = DedupInterceptor::new();
        let mut ctx = OperationContext::new(OperationKind::Get);
        ctx.set_meta(DEDUP_META_KEY, "u1");
        assert!(matches!(interceptor.on_request(&mut ctx).await, Decision::Continue));
        assert_eq!(interceptor.in_flight_count(), 1);
        let outcome = Outcome::new(1i32);
        interceptor.on_response(&ctx, &outcome).await;
        assert_eq!(interceptor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn second_caller_short_circuits_on_leader_response() {
        let interceptor = Arc::new(DedupInterceptor::new());
        let mut leader_ctx = OperationContext::new(OperationKind::Get);
        leader_ctx.set_meta(DEDUP_META_KEY, "u1");
        interceptor.on_request(&mut leader_ctx).await;

        let mut follower_ctx = OperationContext::new(OperationKind::Get);
        follower_ctx.set_meta(DEDUP_META_KEY, "u1");
        let interceptor2 = interceptor.clone();
        let follower = tokio::spawn(async move {
            let mut ctx = follower_ctx;
            interceptor2.on_request(&mut ctx).await
        });

        // Give the follower a moment to subscribe before the leader resolves.
        tokio::task::yield_now().await;
        let outcome = Outcome::new(99i32);
        interceptor.on_response(&leader_ctx, &outcome).await;

        let decision = follower.await.unwrap();
        match decision {
            Decision::ShortCircuit(o) => assert_eq!(*o.downcast::<i32>().unwrap(), 99),
            other => panic!("expected short circuit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_dedup_key_always_continues() {
        let interceptor = DedupInterceptor::new();
        let mut ctx = OperationContext::new(OperationKind::Get);
        assert!(matches!(interceptor.on_request(&mut ctx).await, Decision::Continue));
        assert_eq!(interceptor.in_flight_count(), 0);
    }
}
