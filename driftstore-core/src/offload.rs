//! Offload trait for background task execution.
//!
//! This module provides the [`Offload`] trait which abstracts over
//! different implementations for spawning background tasks.

use std::future::Future;

use smol_str::SmolStr;

/// Trait for spawning background tasks.
///
/// This trait allows the stale-while-revalidate fetch policy, the reactive
/// layer's idle-sink reaper, and fire-and-forget audit logging to offload
/// work without blocking the caller's await point.
///
/// # Implementations
///
/// The primary implementation is `OffloadManager` in the `driftstore` crate,
/// which provides configurable background task execution with policies for
/// handling task completion and timeouts.
///
/// # Clone bound
///
/// Implementors should use `Arc` internally to ensure all cloned instances
/// share the same configuration and state.
///
/// # Example
///
/// ```ignore
/// use driftstore_core::Offload;
///
/// fn offload_revalidate<O: Offload>(offload: &O, id: String) {
///     offload.spawn("revalidate", async move {
///         // Re-sync the entity in the background.
///         println!("Revalidating: {}", id);
///     });
/// }
/// ```
pub trait Offload: Send + Sync + Clone {
    /// Spawn a future to be executed in the background.
    ///
    /// The future will be executed asynchronously and its result will be
    /// handled according to the implementation's policy.
    ///
    /// # Arguments
    ///
    /// * `kind` - A label categorizing the task type (e.g., "revalidate", "cache_write").
    ///   Used for metrics and tracing.
    /// * `future` - The future to execute in the background. Must be `Send + 'static`
    ///   as it may be executed on a different thread.
    fn spawn<F>(&self, kind: impl Into<SmolStr>, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
