//! Shared data model and trait seams for the driftstore engine.
//!
//! This crate has no I/O of its own: it defines the value types
//! (`OperationContext`, `Query`, `PendingChange`, status/policy enums) and the
//! small capability traits (`FieldAccessor`, `Offload`) that every other
//! driftstore crate builds on.
#![warn(missing_docs)]

pub mod accessor;
pub mod change;
pub mod context;
pub mod error;
pub mod offload;
pub mod query;
pub mod status;
pub mod stream;
pub mod tag;

pub use accessor::{FieldAccessor, FieldValue};
pub use change::{ChangeKind, ChangeStatus, ConflictDetails, PendingChange};
pub use context::{OperationContext, OperationKind};
pub use error::{ContextualError, StoreError};
pub use offload::Offload;
pub use query::{Cursor, Filter, Operator, PageInfo, PagedResult, Query, QueryFingerprint, SortKey};
pub use status::{
    CircuitState, ConflictResolution, FetchPolicy, HealthState, StoreLifecycle, SyncMode,
    SyncStatus, WritePolicy,
};
pub use stream::LatestValue;
pub use tag::Tag;
