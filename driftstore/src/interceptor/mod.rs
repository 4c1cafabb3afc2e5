//! The interceptor chain: pluggable request/response/error middleware
//! wrapping every store operation.
//!
//! `Interceptor` is dyn-compatible (no generic methods) so a
//! `Vec<Arc<dyn Interceptor>>` can be stored on [`crate::config::StoreConfig`]
//! regardless of the entity type `T` a particular `Store<T, ID, B>` carries.
//! The entity payload crossing an interceptor is type-erased into
//! [`Outcome`]; the facade is the only place that downcasts back to `T`.
//!
//! Chain visiting order: forward on request, reverse on response/error, so
//! the first interceptor to see a request is the last to see its result.

pub mod dedup;
pub mod retry;
pub mod telemetry;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use driftstore_core::{OperationContext, OperationKind, StoreError};

pub use dedup::DedupInterceptor;
pub use retry::RetryInterceptor;
pub use telemetry::{Reporter, TelemetryInterceptor};

/// A type-erased operation result, carrying whatever payload the facade
/// produced (a single entity, a page of entities, a pending-change count,
/// ...) through interceptors that don't care about its concrete shape.
#[derive(Clone)]
pub struct Outcome(Arc<dyn Any + Send + Sync>);

impl Outcome {
    /// Wraps a concrete value as an `Outcome`.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Outcome(Arc::new(value))
    }

    /// Recovers the concrete value, if `T` matches what was wrapped.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome").finish_non_exhaustive()
    }
}

/// What an interceptor hook wants to happen next.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Proceed unchanged: the next hook (or the backend call, for
    /// `on_request`) runs as normal.
    Continue,
    /// Replace the in-flight outcome and keep walking the remaining chain.
    Respond(Outcome),
    /// Replace the outcome and stop walking the chain immediately — no
    /// further interceptor, and (from `on_request`) no backend call, sees
    /// this operation.
    ShortCircuit(Outcome),
    /// Fail the operation with this error, walking no further.
    Error(StoreError),
}

/// A single interceptor stage. Implementors only override the hooks they
/// care about; unimplemented hooks default to `Continue`/pass-through.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// A short, stable name used in tracing spans and telemetry labels.
    fn name(&self) -> &str;

    /// Whether this interceptor participates in `operation`. Defaults to
    /// every operation.
    fn applies_to(&self, _operation: OperationKind) -> bool {
        true
    }

    /// Runs before the backend/cache call. May short-circuit the whole
    /// operation (e.g. a dedup hit).
    async fn on_request(&self, _ctx: &mut OperationContext) -> Decision {
        Decision::Continue
    }

    /// Runs after a successful call, in reverse chain order.
    async fn on_response(&self, _ctx: &OperationContext, _outcome: &Outcome) -> Decision {
        Decision::Continue
    }

    /// Runs after a failed call, in reverse chain order. May recover the
    /// error into a successful `Outcome`.
    async fn on_error(&self, _ctx: &OperationContext, _error: &StoreError) -> Decision {
        Decision::Continue
    }
}

/// An ordered, immutable list of interceptors, driven around a single
/// operation's backend/cache call.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Builds a chain from an ordered interceptor list.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        InterceptorChain { interceptors }
    }

    /// Number of interceptors registered, regardless of applicability.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// True if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs `call` wrapped by every interceptor applicable to
    /// `ctx.operation`: forward `on_request`, then `call`, then
    /// `on_response`/`on_error` in reverse.
    pub async fn run<F, Fut>(&self, ctx: &mut OperationContext, call: F) -> Result<Outcome, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Outcome, StoreError>>,
    {
        let applicable: Vec<&Arc<dyn Interceptor>> = self
            .interceptors
            .iter()
            .filter(|i| i.applies_to(ctx.operation))
            .collect();

        // Terminating early on `ShortCircuit`/`Error` still has to run
        // `on_response`/`on_error` for every interceptor visited so far (in
        // reverse), so e.g. a telemetry interceptor ordered ahead of a
        // deduplicating one still observes a coalesced follower's result.
        let mut visited = 0;
        let mut short_circuited = None;
        for interceptor in &applicable {
            visited += 1;
            match interceptor.on_request(ctx).await {
                Decision::Continue => {}
                Decision::Respond(outcome) | Decision::ShortCircuit(outcome) => {
                    short_circuited = Some(Ok(outcome));
                    break;
                }
                Decision::Error(err) => {
                    short_circuited = Some(Err(err));
                    break;
                }
            }
        }

        let mut result = match short_circuited {
            Some(result) => result,
            None => call().await,
        };
        for interceptor in applicable[..visited].iter().rev() {
            result = match result {
                Ok(outcome) => match interceptor.on_response(ctx, &outcome).await {
                    Decision::Continue => Ok(outcome),
                    Decision::Respond(o) | Decision::ShortCircuit(o) => Ok(o),
                    Decision::Error(e) => Err(e),
                },
                Err(error) => match interceptor.on_error(ctx, &error).await {
                    Decision::Continue => Err(error),
                    Decision::Respond(o) | Decision::ShortCircuit(o) => Ok(o),
                    Decision::Error(e) => Err(e),
                },
            };
        }
        result
    }
}
