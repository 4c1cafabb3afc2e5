//! Per-call operation context threaded through the policy executor,
//! interceptor chain, and reliability wrapper.

use std::collections::HashMap;

use smol_str::SmolStr;

/// The kind of store operation in flight, used by interceptors to decide
/// applicability (`Interceptor::applies_to`) and by the policy executor to
/// pick a fetch/write policy table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OperationKind {
    /// Single-entity read.
    Get,
    /// Query-filtered multi-entity read.
    GetAll,
    /// Single-entity create/replace.
    Save,
    /// Batch create/replace.
    SaveAll,
    /// Single-entity delete.
    Delete,
    /// Query-filtered bulk delete.
    DeleteAll,
    /// Pending-change queue drain.
    Sync,
}

/// Carries attempt/retry bookkeeping and free-form metadata through a single
/// store-operation call as it passes through the interceptor chain.
///
/// Cloning an `OperationContext` does not reset `attempt` — the retry
/// interceptor increments the same context on each re-invocation so
/// downstream interceptors and the telemetry sink see a consistent count.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// The kind of operation this context accompanies.
    pub operation: OperationKind,
    /// 1 on the first attempt, incremented on each retry.
    pub attempt: u32,
    /// Free-form key/value metadata interceptors may read or set (e.g. a
    /// trace id, or a dedup key override).
    pub metadata: HashMap<SmolStr, SmolStr>,
}

impl OperationContext {
    /// Creates a fresh context for a new operation, with `attempt` at 1.
    pub fn new(operation: OperationKind) -> Self {
        OperationContext {
            operation,
            attempt: 1,
            metadata: HashMap::new(),
        }
    }

    /// Increments the attempt counter, for use by the retry interceptor
    /// before re-invoking downstream.
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Reads a metadata value by key.
    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(SmolStr::as_str)
    }

    /// Sets a metadata value.
    pub fn set_meta(&mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.metadata.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_starts_at_attempt_one() {
        let ctx = OperationContext::new(OperationKind::Get);
        assert_eq!(ctx.attempt, 1);
    }

    #[test]
    fn next_attempt_increments() {
        let mut ctx = OperationContext::new(OperationKind::Save);
        ctx.next_attempt();
        ctx.next_attempt();
        assert_eq!(ctx.attempt, 3);
    }

    #[test]
    fn metadata_round_trips() {
        let mut ctx = OperationContext::new(OperationKind::Delete);
        ctx.set_meta("trace_id", "abc123");
        assert_eq!(ctx.get_meta("trace_id"), Some("abc123"));
        assert_eq!(ctx.get_meta("missing"), None);
    }
}
