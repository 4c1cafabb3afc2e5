//! Test doubles for exercising `driftstore` without a real storage backend.
//!
//! [`InMemoryBackend`] implements `driftstore_backend::Backend` over a
//! `DashMap`, with call counters and scriptable latency/failure injection.
//! [`ManualClock`] advances a simulated `DateTime<Utc>` by hand, for
//! deterministic staleness and retry-backoff assertions.
#![warn(missing_docs)]

mod clock;
mod memory_backend;

pub use clock::ManualClock;
pub use memory_backend::{BackendCounters, InMemoryBackend};
