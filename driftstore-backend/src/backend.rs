//! The Backend Contract: the single collaborator interface every storage
//! technology (SQL, REST, CRDT, or a test double) implements to plug into the
//! engine.
//!
//! [`Backend`] carries the raw entity-CRUD operations. Backends that have no
//! natural notion of a pending-change queue, pagination, or a sync status
//! stream simply inherit the mixin defaults — they only override what they
//! can actually do better than the default, mirroring their
//! [`BackendCapabilities`].

use async_trait::async_trait;
use driftstore_core::{PagedResult, Query, StoreError, SyncStatus};
use tokio::sync::watch;

/// Capability flags a backend advertises so the policy executor and
/// conflict resolver can make informed decisions instead of guessing.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BackendCapabilities {
    /// The backend persists writes locally and can serve reads without
    /// connectivity (e.g. embedded SQL, on-disk CRDT log).
    pub supports_offline: bool,
    /// The backend can push server-initiated changes (via `watch`/`watch_all`
    /// emissions outside of a local `save`).
    pub supports_realtime: bool,
    /// `save_all`/`delete_all` are applied atomically.
    pub supports_transactions: bool,
    /// `get_all_paged`/`watch_all_paged` return real cursors rather than the
    /// mixin's single-unpaged-page fallback.
    pub supports_pagination: bool,
    /// The backend tolerates overlapping concurrent calls for the same id
    /// (no external synchronization required by the caller).
    pub supports_concurrent_calls: bool,
    /// The backend can re-apply a write while explicitly discarding a
    /// version conflict, required by `ConflictResolution::ClientWins`.
    pub supports_force_overwrite: bool,
}

/// The Backend Contract.
///
/// `T` is the entity payload type; `ID` is its identifier type. Implement
/// this trait once per storage technology; everything above it (cache index,
/// reactive layer, pending-change machine, policy executor) is written
/// against this interface alone.
///
/// # Dyn-compatibility
///
/// Blanket implementations are provided for `&dyn Backend<T, ID>`,
/// `Box<dyn Backend<T, ID>>`, and `std::sync::Arc<dyn Backend<T, ID>>` so the
/// engine can hold a backend as a trait object.
///
/// # Defaults
///
/// `sync`, `sync_status`, `sync_status_stream`, `pending_changes_count`,
/// `get_all_paged`, and `watch_all_paged` have sensible defaults for
/// backends with no sync queue or pagination of their own: `sync` is a
/// no-op, `sync_status` always reports [`SyncStatus::Synced`],
/// `pending_changes_count` is always zero, and the paged variants wrap
/// `get_all`/`watch_all` in a single unpaged page.
#[async_trait]
pub trait Backend<T, ID>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Send + Sync + 'static,
{
    /// Reads a single entity by id.
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError>;

    /// Reads all entities matching `query`, or every entity if `query` is
    /// `None`.
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError>;

    /// Subscribes to the latest-value stream for a single id. The returned
    /// receiver's current value reflects the entity's state as of
    /// subscription time.
    async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<T>>, StoreError>;

    /// Subscribes to the latest-value stream for a query's result set.
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<T>>, StoreError>;

    /// Creates or replaces an entity, returning it with any server-assigned
    /// fields populated.
    async fn save(&self, item: T) -> Result<T, StoreError>;

    /// Creates or replaces a batch of entities.
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError>;

    /// Deletes a single entity. Returns `true` if an entity was actually
    /// removed.
    async fn delete(&self, id: &ID) -> Result<bool, StoreError>;

    /// Deletes a batch of entities by id, returning the count actually
    /// removed.
    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError>;

    /// Deletes every entity matching `query`, returning the count removed.
    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError>;

    /// Prepares the backend for use (opening connections, running
    /// migrations). Called once by the facade before accepting operations.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Releases backend resources. Called once by the facade; no further
    /// operations are issued afterward.
    async fn close(&self) -> Result<(), StoreError>;

    /// The capability flags this backend advertises.
    fn capabilities(&self) -> BackendCapabilities;

    /// Drains the pending-change queue against this backend. Backends with
    /// no queue of their own (an in-memory test double, a pure REST client
    /// with no offline buffering) accept the no-op default.
    async fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Current store-level sync status. Backends with no sync machinery
    /// report [`SyncStatus::Synced`] unconditionally.
    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        Ok(SyncStatus::Synced)
    }

    /// A stream of sync status transitions, if this backend can produce one.
    fn sync_status_stream(&self) -> Option<watch::Receiver<SyncStatus>> {
        None
    }

    /// Count of changes awaiting sync. Zero for backends with no queue.
    async fn pending_changes_count(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    /// Reads a page of entities matching `query`. Backends without native
    /// pagination (`BackendCapabilities::supports_pagination == false`)
    /// inherit the default, which wraps `get_all` in a single unpaged page
    /// (`has_next_page = false`).
    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        let items = self.get_all(Some(query)).await?;
        Ok(PagedResult::unpaged(items))
    }
}

#[async_trait]
impl<T, ID, B> Backend<T, ID> for &B
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Send + Sync + 'static,
    B: Backend<T, ID> + ?Sized,
{
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError> {
        (**self).get(id).await
    }
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError> {
        (**self).get_all(query).await
    }
    async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<T>>, StoreError> {
        (**self).watch(id).await
    }
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<T>>, StoreError> {
        (**self).watch_all(query).await
    }
    async fn save(&self, item: T) -> Result<T, StoreError> {
        (**self).save(item).await
    }
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError> {
        (**self).save_all(items).await
    }
    async fn delete(&self, id: &ID) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }
    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError> {
        (**self).delete_all(ids).await
    }
    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError> {
        (**self).delete_where(query).await
    }
    async fn initialize(&self) -> Result<(), StoreError> {
        (**self).initialize().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }
    async fn sync(&self) -> Result<(), StoreError> {
        (**self).sync().await
    }
    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        (**self).sync_status().await
    }
    fn sync_status_stream(&self) -> Option<watch::Receiver<SyncStatus>> {
        (**self).sync_status_stream()
    }
    async fn pending_changes_count(&self) -> Result<usize, StoreError> {
        (**self).pending_changes_count().await
    }
    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        (**self).get_all_paged(query).await
    }
}

#[async_trait]
impl<T, ID, B> Backend<T, ID> for Box<B>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Send + Sync + 'static,
    B: Backend<T, ID> + ?Sized,
{
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError> {
        (**self).get(id).await
    }
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError> {
        (**self).get_all(query).await
    }
    async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<T>>, StoreError> {
        (**self).watch(id).await
    }
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<T>>, StoreError> {
        (**self).watch_all(query).await
    }
    async fn save(&self, item: T) -> Result<T, StoreError> {
        (**self).save(item).await
    }
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError> {
        (**self).save_all(items).await
    }
    async fn delete(&self, id: &ID) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }
    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError> {
        (**self).delete_all(ids).await
    }
    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError> {
        (**self).delete_where(query).await
    }
    async fn initialize(&self) -> Result<(), StoreError> {
        (**self).initialize().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }
    async fn sync(&self) -> Result<(), StoreError> {
        (**self).sync().await
    }
    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        (**self).sync_status().await
    }
    fn sync_status_stream(&self) -> Option<watch::Receiver<SyncStatus>> {
        (**self).sync_status_stream()
    }
    async fn pending_changes_count(&self) -> Result<usize, StoreError> {
        (**self).pending_changes_count().await
    }
    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        (**self).get_all_paged(query).await
    }
}

#[async_trait]
impl<T, ID, B> Backend<T, ID> for std::sync::Arc<B>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Send + Sync + 'static,
    B: Backend<T, ID> + ?Sized,
{
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError> {
        (**self).get(id).await
    }
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError> {
        (**self).get_all(query).await
    }
    async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<T>>, StoreError> {
        (**self).watch(id).await
    }
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<T>>, StoreError> {
        (**self).watch_all(query).await
    }
    async fn save(&self, item: T) -> Result<T, StoreError> {
        (**self).save(item).await
    }
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError> {
        (**self).save_all(items).await
    }
    async fn delete(&self, id: &ID) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }
    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError> {
        (**self).delete_all(ids).await
    }
    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError> {
        (**self).delete_where(query).await
    }
    async fn initialize(&self) -> Result<(), StoreError> {
        (**self).initialize().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }
    async fn sync(&self) -> Result<(), StoreError> {
        (**self).sync().await
    }
    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        (**self).sync_status().await
    }
    fn sync_status_stream(&self) -> Option<watch::Receiver<SyncStatus>> {
        (**self).sync_status_stream()
    }
    async fn pending_changes_count(&self) -> Result<usize, StoreError> {
        (**self).pending_changes_count().await
    }
    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        (**self).get_all_paged(query).await
    }
}
