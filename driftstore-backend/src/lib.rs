//! The Backend Contract shared by every storage technology the engine can
//! drive: SQL, REST, CRDT, or a test double.
#![warn(missing_docs)]

pub mod backend;

pub use backend::{Backend, BackendCapabilities};
