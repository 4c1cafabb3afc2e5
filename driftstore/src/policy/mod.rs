//! The policy executor: stateless fetch/write strategy tables driving how a
//! single operation touches the cache and the backend.
//!
//! Both sub-handlers are pure functions of (request, policy, backend,
//! cache metadata, clock) — they never retry on their own; retrying a
//! transient failure is the retry interceptor's job, not the policy's.

pub mod fetch;
pub mod write;

pub use fetch::{FetchAllOutcome, FetchOutcome, execute, execute_all};
pub use write::{
    WriteAllOutcome, WriteOutcome, execute_delete, execute_delete_all, execute_save,
    execute_save_all,
};
