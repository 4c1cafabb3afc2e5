//! The Store Facade: the single entry point consumers hold, wiring the
//! cache index, reactive subscription layer, pending-change queue, policy
//! executor, interceptor chain, and reliability wrapper into the
//! `get`/`save`/`watch`/`sync` surface described by the crate's README.
//!
//! `Store<T, ID, B>` is a cheaply-cloneable handle over `Arc<StoreInner>` —
//! cloning it shares every collaborator, the same way cloning an
//! `OffloadManager` shares its task table.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use driftstore_backend::Backend;
use driftstore_core::{
    ChangeKind, ConflictDetails, ConflictResolution, FetchPolicy, FieldAccessor, HealthState,
    OperationContext, OperationKind, Offload, PagedResult, PendingChange, Query, StoreError,
    StoreLifecycle, SyncMode, SyncStatus, Tag, WritePolicy,
};
use tokio::sync::watch;

use crate::cache_index::CacheIndex;
use crate::config::StoreConfig;
use crate::interceptor::{InterceptorChain, Outcome};
use crate::interceptor::retry::{Backoff, with_retry};
use crate::offload::OffloadManager;
use crate::pending::{ConflictOutcome, MergeFn, PendingChangeQueue, resolve_conflict};
use crate::policy;
use crate::policy::fetch::{FetchAllOutcome, FetchOutcome, RevalidatePublisher};
use crate::policy::write::{WriteAllOutcome, WriteOutcome};
use crate::reactive::SubscriptionRegistry;
use crate::reliability::{CircuitBreaker, GuardedBackend, HealthProbe};

const LIFECYCLE_UNINITIALIZED: u8 = 0;
const LIFECYCLE_READY: u8 = 1;
const LIFECYCLE_DISPOSED: u8 = 2;

const DEDUP_META_KEY: &str = "dedup_key";

/// Fire-and-forget audit sink invoked after an operation completes, when
/// `StoreConfig::enable_audit_logging` is set.
///
/// A no-op collaborator interface — concrete implementations (structured
/// log shipping, an append-only ledger, a compliance pipeline) are out of
/// scope for this crate, same as [`crate::interceptor::telemetry::Reporter`].
#[async_trait]
pub trait AuditSink<T, ID>: Send + Sync
where
    T: Send + Sync + 'static,
    ID: Send + Sync + 'static,
{
    /// Records one completed operation. Never awaited by the caller's own
    /// call stack — always spawned onto the offload manager.
    async fn record(&self, operation: OperationKind, entity_id: Option<ID>, value: Option<Arc<T>>);
}

struct StoreInner<T, ID, B> {
    config: StoreConfig,
    backend: Arc<GuardedBackend<B>>,
    cache_index: Arc<CacheIndex<ID>>,
    subscriptions: Arc<SubscriptionRegistry<T, ID>>,
    pending: Arc<PendingChangeQueue<T, ID>>,
    health: HealthProbe,
    offload: OffloadManager,
    interceptors: InterceptorChain,
    id_of: Arc<dyn Fn(&T) -> ID + Send + Sync>,
    accessor: Arc<dyn FieldAccessor<T>>,
    merge_fn: Option<MergeFn<T>>,
    audit_sink: Option<Arc<dyn AuditSink<T, ID>>>,
    lifecycle: AtomicU8,
}

/// The reactive, offline-tolerant data-store facade. `T` is the entity
/// payload, `ID` its identifier, `B` the backend technology plugged in at
/// construction.
pub struct Store<T, ID, B> {
    inner: Arc<StoreInner<T, ID, B>>,
}

impl<T, ID, B> Clone for Store<T, ID, B> {
    fn clone(&self) -> Self {
        Store { inner: Arc::clone(&self.inner) }
    }
}

/// Builds a [`Store`], wiring in the required id/field-accessor
/// capabilities plus optional conflict-merge and audit collaborators.
pub struct StoreBuilder<T, ID, B> {
    backend: B,
    config: StoreConfig,
    id_of: Arc<dyn Fn(&T) -> ID + Send + Sync>,
    accessor: Arc<dyn FieldAccessor<T>>,
    merge_fn: Option<MergeFn<T>>,
    audit_sink: Option<Arc<dyn AuditSink<T, ID>>>,
}

impl<T, ID, B> StoreBuilder<T, ID, B>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    B: Backend<T, ID> + 'static,
{
    /// Starts a builder over `backend`, `config`, and the mandatory
    /// id-extraction/field-accessor capabilities.
    pub fn new(
        backend: B,
        config: StoreConfig,
        id_of: impl Fn(&T) -> ID + Send + Sync + 'static,
        accessor: Arc<dyn FieldAccessor<T>>,
    ) -> Self {
        StoreBuilder {
            backend,
            config,
            id_of: Arc::new(id_of),
            accessor,
            merge_fn: None,
            audit_sink: None,
        }
    }

    /// Sets the combiner `ConflictResolution::Merge` calls on a conflict.
    pub fn merge_fn(mut self, merge_fn: impl Fn(&T, &T) -> T + Send + Sync + 'static) -> Self {
        self.merge_fn = Some(Arc::new(merge_fn));
        self
    }

    /// Sets the fire-and-forget audit sink.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink<T, ID>>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Builds the store. Still `Uninitialized` until [`Store::initialize`]
    /// runs.
    pub fn build(self) -> Store<T, ID, B> {
        let circuit = CircuitBreaker::new(self.config.circuit_breaker_config.clone());
        let backend = Arc::new(GuardedBackend::new(Arc::new(self.backend), circuit));
        let inner = StoreInner {
            interceptors: InterceptorChain::new(self.config.interceptors.clone()),
            offload: OffloadManager::with_defaults(),
            cache_index: Arc::new(CacheIndex::new()),
            subscriptions: Arc::new(SubscriptionRegistry::default()),
            pending: Arc::new(PendingChangeQueue::new()),
            health: HealthProbe::new(),
            backend,
            config: self.config,
            id_of: self.id_of,
            accessor: self.accessor,
            merge_fn: self.merge_fn,
            audit_sink: self.audit_sink,
            lifecycle: AtomicU8::new(LIFECYCLE_UNINITIALIZED),
        };
        Store { inner: Arc::new(inner) }
    }
}

impl<T, ID, B> Store<T, ID, B>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    B: Backend<T, ID> + 'static,
{
    /// Starts a [`StoreBuilder`].
    pub fn builder(
        backend: B,
        config: StoreConfig,
        id_of: impl Fn(&T) -> ID + Send + Sync + 'static,
        accessor: Arc<dyn FieldAccessor<T>>,
    ) -> StoreBuilder<T, ID, B> {
        StoreBuilder::new(backend, config, id_of, accessor)
    }

    fn lifecycle(&self) -> StoreLifecycle {
        match self.inner.lifecycle.load(Ordering::Acquire) {
            LIFECYCLE_READY => StoreLifecycle::Ready,
            LIFECYCLE_DISPOSED => StoreLifecycle::Disposed,
            _ => StoreLifecycle::Uninitialized,
        }
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        match self.lifecycle() {
            StoreLifecycle::Ready => Ok(()),
            _ => Err(StoreError::Lifecycle),
        }
    }

    fn id_of(&self, item: &T) -> ID {
        (self.inner.id_of)(item)
    }

    /// Prepares the backend and background machinery: opens the backend,
    /// starts the reactive layer's idle-sink reaper, and — under
    /// `SyncMode::Periodic` — schedules a recurring `sync()`. Must be
    /// called once before any other operation.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.inner.backend.initialize().await?;
        self.inner.subscriptions.spawn_idle_reaper(&self.inner.offload);
        if matches!(self.inner.config.sync_mode, SyncMode::Periodic) {
            if let Some(interval) = self.inner.config.sync_interval {
                let store = self.clone();
                self.inner.offload.spawn("periodic_sync", async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        ticker.tick().await;
                        if let Err(err) = store.sync().await {
                            tracing::warn!(error = %err, "periodic sync failed");
                        }
                    }
                });
            }
        }
        self.inner.lifecycle.store(LIFECYCLE_READY, Ordering::Release);
        Ok(())
    }

    /// Releases backend resources and cancels background tasks (the idle
    /// reaper, periodic sync). No further operations succeed afterward.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.inner.lifecycle.store(LIFECYCLE_DISPOSED, Ordering::Release);
        self.inner.offload.cancel_all();
        self.inner.backend.close().await
    }

    async fn recompute_health(&self) {
        let circuit = self.inner.backend.circuit().state();
        let sync_status = self.inner.pending.status();
        let pending = self.inner.pending.len();
        self.inner.health.recompute(circuit, sync_status, pending);
        #[cfg(feature = "metrics")]
        metrics::gauge!(*crate::metrics::STORE_PENDING_CHANGES).set(pending as f64);
    }

    fn audit(&self, operation: OperationKind, entity_id: Option<ID>, value: Option<Arc<T>>) {
        if !self.inner.config.enable_audit_logging {
            return;
        }
        let Some(sink) = self.inner.audit_sink.clone() else {
            return;
        };
        self.inner.offload.spawn("audit_log", async move {
            sink.record(operation, entity_id, value).await;
        });
    }

    /// Subscribes to health-state transitions aggregated from circuit
    /// state, sync status, and pending-change backlog.
    pub fn health_stream(&self) -> watch::Receiver<HealthState> {
        self.inner.health.stream()
    }

    /// Reads a single entity by id, applying `policy` (or the configured
    /// default fetch policy).
    pub async fn get(&self, id: &ID, policy: Option<FetchPolicy>) -> Result<Option<Arc<T>>, StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.fetch_policy);
        let mut ctx = OperationContext::new(OperationKind::Get);
        ctx.set_meta(DEDUP_META_KEY, format!("{id:?}"));

        let backend = Arc::clone(&self.inner.backend);
        let cache_index = Arc::clone(&self.inner.cache_index);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();
        let stale_duration = self.inner.config.stale_duration;
        let id_owned = id.clone();
        let now = Utc::now();
        let publisher = RevalidatePublisher {
            subscriptions: Arc::clone(&self.inner.subscriptions),
            id_of: Arc::clone(&self.inner.id_of),
            accessor: Arc::clone(&self.inner.accessor),
        };

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::Get);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let cache_index = Arc::clone(&cache_index);
                    let offload = offload.clone();
                    let id = id_owned.clone();
                    let publisher = publisher.clone();
                    async move {
                        policy::fetch::execute::<T, ID, _, _>(
                            &id,
                            policy,
                            &backend,
                            &cache_index,
                            stale_duration,
                            now,
                            &offload,
                            Some(&publisher),
                        )
                        .await
                    }
                })
                .await
                .map(Outcome::new)
            })
            .await?;

        let outcome = result
            .downcast::<FetchOutcome<T>>()
            .expect("get() outcome is always a FetchOutcome<T>");

        #[cfg(feature = "metrics")]
        {
            if outcome.synced {
                metrics::counter!(*crate::metrics::STORE_CACHE_MISS_COUNTER).increment(1);
            } else {
                metrics::counter!(*crate::metrics::STORE_CACHE_HIT_COUNTER).increment(1);
            }
        }

        let value = outcome.value.clone();
        if let Some(value) = &value {
            let value = Arc::new(value.clone());
            self.inner
                .subscriptions
                .notify_upsert(id, value.clone(), |v| self.id_of(v), self.inner.accessor.as_ref());
            self.audit(OperationKind::Get, Some(id.clone()), Some(value.clone()));
            self.recompute_health().await;
            return Ok(Some(value));
        }
        self.audit(OperationKind::Get, Some(id.clone()), None);
        Ok(None)
    }

    /// Reads every entity matching `query` (or every entity if `query` is
    /// `None`), applying `policy` (or the configured default).
    pub async fn get_all(
        &self,
        query: Option<Query>,
        policy: Option<FetchPolicy>,
    ) -> Result<PagedResult<Arc<T>>, StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.fetch_policy);
        let effective_query = query.clone().unwrap_or_default();
        let mut ctx = OperationContext::new(OperationKind::GetAll);
        ctx.set_meta(DEDUP_META_KEY, effective_query.fingerprint().to_string());

        let backend = Arc::clone(&self.inner.backend);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::GetAll);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let offload = offload.clone();
                    let query = effective_query.clone();
                    async move { policy::fetch::execute_all::<T, ID, _, _>(&query, policy, &backend, &offload).await }
                })
                .await
                .map(Outcome::new)
            })
            .await?;

        let outcome = result
            .downcast::<FetchAllOutcome<T>>()
            .expect("get_all() outcome is always a FetchAllOutcome<T>");

        #[cfg(feature = "metrics")]
        {
            if outcome.synced {
                metrics::counter!(*crate::metrics::STORE_CACHE_MISS_COUNTER).increment(1);
            } else {
                metrics::counter!(*crate::metrics::STORE_CACHE_HIT_COUNTER).increment(1);
            }
        }

        let items: Vec<Arc<T>> = outcome.items.items.iter().cloned().map(Arc::new).collect();
        self.audit(OperationKind::GetAll, None, None);
        self.recompute_health().await;
        Ok(PagedResult {
            items,
            page_info: outcome.items.page_info.clone(),
        })
    }

    /// Subscribes to the latest-value stream for a single id, seeded with
    /// a `cacheOnly` read so the first emission matches the current cache
    /// state without forcing a sync.
    pub async fn watch(&self, id: &ID) -> Result<watch::Receiver<Option<Arc<T>>>, StoreError> {
        self.ensure_ready()?;
        let seed = self.get(id, Some(FetchPolicy::CacheOnly)).await?;
        Ok(self.inner.subscriptions.watch(id, || seed))
    }

    /// Subscribes to the latest-value stream for a query's result set,
    /// seeded the same way as [`Store::watch`].
    pub async fn watch_all(&self, query: Option<Query>) -> Result<watch::Receiver<Arc<Vec<Arc<T>>>>, StoreError> {
        self.ensure_ready()?;
        let effective_query = query.clone().unwrap_or_default();
        let seed = self.get_all(query, Some(FetchPolicy::CacheOnly)).await?;
        Ok(self
            .inner
            .subscriptions
            .watch_all(&effective_query, || seed.items))
    }

    /// Creates or replaces `item`, applying `policy` (or the configured
    /// default write policy) and attaching `tags` to the cache-index entry.
    pub async fn save(
        &self,
        item: T,
        policy: Option<WritePolicy>,
        tags: Option<Vec<Tag>>,
    ) -> Result<Arc<T>, StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.write_policy);
        let id = self.id_of(&item);
        let fallback = item.clone();
        let mut ctx = OperationContext::new(OperationKind::Save);

        let backend = Arc::clone(&self.inner.backend);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();
        let item_for_call = item.clone();

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::Save);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let offload = offload.clone();
                    let item = item_for_call.clone();
                    async move { policy::write::execute_save::<T, ID, _, _>(item, policy, &backend, &offload).await }
                })
                .await
                .map(Outcome::new)
            })
            .await;

        let now = Utc::now();
        match result {
            Ok(outcome) => {
                let outcome = outcome
                    .downcast::<WriteOutcome<T>>()
                    .expect("save() outcome is always a WriteOutcome<T>");
                let value = outcome.value.clone().unwrap_or(fallback);
                self.inner
                    .cache_index
                    .record(id.clone(), tags.unwrap_or_default(), now);
                let shared = Arc::new(value.clone());
                self.inner
                    .subscriptions
                    .notify_upsert(&id, shared.clone(), |v| self.id_of(v), self.inner.accessor.as_ref());
                if outcome.synced {
                    self.inner.pending.mark_synced(&id);
                } else {
                    self.inner.pending.enqueue_save(id.clone(), value, now);
                }
                self.audit(OperationKind::Save, Some(id), Some(shared.clone()));
                self.recompute_health().await;
                Ok(shared)
            }
            Err(err) => {
                self.inner.cache_index.record(id.clone(), tags.unwrap_or_default(), now);
                let shared = Arc::new(fallback.clone());
                self.inner
                    .subscriptions
                    .notify_upsert(&id, shared.clone(), |v| self.id_of(v), self.inner.accessor.as_ref());
                self.inner.pending.enqueue_save(id.clone(), fallback, now);
                self.audit(OperationKind::Save, Some(id), None);
                self.recompute_health().await;
                Err(err)
            }
        }
    }

    /// Batch form of [`Store::save`].
    pub async fn save_all(
        &self,
        items: Vec<T>,
        policy: Option<WritePolicy>,
        tags: Option<Vec<Tag>>,
    ) -> Result<Vec<Arc<T>>, StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.write_policy);
        let fallback_ids: Vec<ID> = items.iter().map(|item| self.id_of(item)).collect();
        let mut ctx = OperationContext::new(OperationKind::SaveAll);

        let backend = Arc::clone(&self.inner.backend);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();
        let items_for_call = items.clone();

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::SaveAll);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let offload = offload.clone();
                    let items = items_for_call.clone();
                    async move { policy::write::execute_save_all::<T, ID, _, _>(items, policy, &backend, &offload).await }
                })
                .await
                .map(Outcome::new)
            })
            .await;

        let now = Utc::now();
        match result {
            Ok(outcome) => {
                let outcome = outcome
                    .downcast::<WriteAllOutcome<T>>()
                    .expect("save_all() outcome is always a WriteAllOutcome<T>");
                let values = if outcome.values.is_empty() { items } else { outcome.values.clone() };
                let mut shared = Vec::with_capacity(values.len());
                for value in values {
                    let id = self.id_of(&value);
                    self.inner
                        .cache_index
                        .record(id.clone(), tags.clone().unwrap_or_default(), now);
                    let value = Arc::new(value);
                    self.inner
                        .subscriptions
                        .notify_upsert(&id, value.clone(), |v| self.id_of(v), self.inner.accessor.as_ref());
                    if outcome.synced {
                        self.inner.pending.mark_synced(&id);
                    } else {
                        self.inner.pending.enqueue_save(id, (*value).clone(), now);
                    }
                    shared.push(value);
                }
                self.audit(OperationKind::SaveAll, None, None);
                self.recompute_health().await;
                Ok(shared)
            }
            Err(err) => {
                let mut shared = Vec::with_capacity(items.len());
                for (id, value) in fallback_ids.into_iter().zip(items.into_iter()) {
                    self.inner
                        .cache_index
                        .record(id.clone(), tags.clone().unwrap_or_default(), now);
                    let value = Arc::new(value);
                    self.inner
                        .subscriptions
                        .notify_upsert(&id, value.clone(), |v| self.id_of(v), self.inner.accessor.as_ref());
                    self.inner.pending.enqueue_save(id, (*value).clone(), now);
                    shared.push(value);
                }
                self.audit(OperationKind::SaveAll, None, None);
                self.recompute_health().await;
                Err(err)
            }
        }
    }

    /// Deletes a single entity by id.
    pub async fn delete(&self, id: &ID, policy: Option<WritePolicy>) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.write_policy);
        let mut ctx = OperationContext::new(OperationKind::Delete);

        let backend = Arc::clone(&self.inner.backend);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();
        let id_owned = id.clone();

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::Delete);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let offload = offload.clone();
                    let id = id_owned.clone();
                    async move {
                        policy::write::execute_delete::<T, ID, _, _>(&id, policy, &backend, &offload).await
                    }
                })
                .await
                .map(Outcome::new)
            })
            .await;

        let now = Utc::now();
        match result {
            Ok(outcome) => {
                let outcome = outcome
                    .downcast::<WriteOutcome<T>>()
                    .expect("delete() outcome is always a WriteOutcome<T>");
                self.inner.cache_index.remove(id);
                self.inner.subscriptions.notify_delete(id, |v| self.id_of(v));
                if outcome.synced {
                    self.inner.pending.mark_synced(id);
                } else {
                    self.inner.pending.enqueue_delete(id.clone(), now);
                }
                self.audit(OperationKind::Delete, Some(id.clone()), None);
                self.recompute_health().await;
                Ok(())
            }
            Err(err) => {
                self.inner.cache_index.remove(id);
                self.inner.subscriptions.notify_delete(id, |v| self.id_of(v));
                self.inner.pending.enqueue_delete(id.clone(), now);
                self.audit(OperationKind::Delete, Some(id.clone()), None);
                self.recompute_health().await;
                Err(err)
            }
        }
    }

    /// Batch form of [`Store::delete`].
    pub async fn delete_all(&self, ids: &[ID], policy: Option<WritePolicy>) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let policy = policy.unwrap_or(self.inner.config.write_policy);
        let mut ctx = OperationContext::new(OperationKind::DeleteAll);

        let backend = Arc::clone(&self.inner.backend);
        let offload = self.inner.offload.clone();
        let retry_config = self.inner.config.retry_config.clone();
        let ids_owned = ids.to_vec();

        let result = self
            .inner
            .interceptors
            .run(&mut ctx, || async move {
                let mut retry_ctx = OperationContext::new(OperationKind::DeleteAll);
                with_retry(&retry_config, &mut retry_ctx, || {
                    let backend = Arc::clone(&backend);
                    let offload = offload.clone();
                    let ids = ids_owned.clone();
                    async move {
                        policy::write::execute_delete_all::<T, ID, _, _>(&ids, policy, &backend, &offload).await
                    }
                })
                .await
                .map(Outcome::new)
            })
            .await;

        let now = Utc::now();
        match result {
            Ok(outcome) => {
                let _outcome = outcome
                    .downcast::<WriteAllOutcome<T>>()
                    .expect("delete_all() outcome is always a WriteAllOutcome<T>");
                for id in ids {
                    self.inner.cache_index.remove(id);
                    self.inner.subscriptions.notify_delete(id, |v| self.id_of(v));
                    self.inner.pending.mark_synced(id);
                }
                self.audit(OperationKind::DeleteAll, None, None);
                self.recompute_health().await;
                Ok(())
            }
            Err(err) => {
                for id in ids {
                    self.inner.cache_index.remove(id);
                    self.inner.subscriptions.notify_delete(id, |v| self.id_of(v));
                    self.inner.pending.enqueue_delete(id.clone(), now);
                }
                self.audit(OperationKind::DeleteAll, None, None);
                self.recompute_health().await;
                Err(err)
            }
        }
    }

    /// Drains the pending-change queue: applies every due change to the
    /// backend, resolving conflicts per `StoreConfig::conflict_resolution`,
    /// then asks the backend to drain whatever internal queue it keeps of
    /// its own.
    pub async fn sync(&self) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let now = Utc::now();
        for id in self.inner.pending.due(now) {
            let Some(change) = self.inner.pending.get(&id) else {
                continue;
            };
            self.inner.pending.mark_in_flight(&id);
            let apply_result: Result<(), StoreError> = match change.kind {
                ChangeKind::Save => {
                    let payload = change
                        .payload
                        .clone()
                        .expect("a queued save change always carries a payload");
                    self.inner.backend.save(payload).await.map(|_| ())
                }
                ChangeKind::Delete => self.inner.backend.delete(&id).await.map(|_| ()),
            };

            match apply_result {
                Ok(()) => self.inner.pending.mark_synced(&id),
                Err(StoreError::Conflict { remote, .. }) => {
                    if let Some(remote) = &remote {
                        tracing::warn!(entity_id = ?id, remote, "pending change conflicted with remote payload");
                    }
                    #[cfg(feature = "metrics")]
                    metrics::counter!(*crate::metrics::STORE_CONFLICTS).increment(1);
                    let details = ConflictDetails {
                        local: change.payload.clone(),
                        remote: None,
                        remote_version: None,
                        detected_at: now,
                    };
                    self.inner.pending.mark_conflicting(&id, details.clone());
                    let merge_fn = self.inner.merge_fn.as_deref();
                    let resolution = resolve_conflict(
                        self.inner.config.conflict_resolution,
                        &details,
                        Some(self.inner.accessor.as_ref()),
                        merge_fn,
                        self.inner.backend.capabilities().supports_force_overwrite,
                    );
                    match resolution {
                        ConflictOutcome::Reapply(payload) => {
                            self.inner.pending.requeue(&id, payload, now);
                        }
                        ConflictOutcome::DropLocal => {
                            self.inner.pending.discard(&id);
                            self.inner.cache_index.invalidate(&id);
                        }
                        ConflictOutcome::Defer => {}
                    }
                }
                Err(err) if err.is_transient() => {
                    let backoff = Backoff::from(&self.inner.config.retry_config);
                    if change.attempts >= self.inner.config.retry_config.max_attempts {
                        self.inner.pending.mark_exhausted(&id);
                    } else {
                        self.inner.pending.mark_failed(&id, &backoff, now);
                    }
                }
                Err(_) => self.inner.pending.mark_exhausted(&id),
            }
        }

        let result = self.inner.backend.sync().await;
        #[cfg(feature = "metrics")]
        metrics::counter!(*crate::metrics::STORE_SYNC_CALLS).increment(1);
        self.recompute_health().await;
        result
    }

    /// Current derived sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.pending.status()
    }

    /// Subscribes to sync-status transitions.
    pub fn sync_status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.inner.pending.status_stream()
    }

    /// Number of changes currently queued or in flight.
    pub fn pending_changes_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forces the next read of `id` to consult the backend.
    pub fn invalidate(&self, id: &ID) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.inner.cache_index.invalidate(id);
        Ok(())
    }

    /// Forces the next read of every tracked id to consult the backend.
    pub fn invalidate_all(&self) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.inner.cache_index.invalidate_all();
        Ok(())
    }

    /// Forces the next read of every id carrying at least one of `tags` to
    /// consult the backend. A no-op for an empty tag set.
    pub fn invalidate_by_tags(&self, tags: &[Tag]) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.inner.cache_index.invalidate_by_tags(tags);
        Ok(())
    }

    /// Forces the next read of every tracked id whose backend-fetched value
    /// satisfies `query` to consult the backend. O(N) over the tracked id
    /// set — see [`CacheIndex::invalidate_where`].
    pub async fn invalidate_where(&self, query: &Query) -> Result<usize, StoreError> {
        self.ensure_ready()?;
        self.inner
            .cache_index
            .invalidate_where(query, self.inner.accessor.as_ref(), self.inner.backend.as_ref())
            .await
    }

    /// Every pending change currently awaiting conflict resolution. Under
    /// `ConflictResolution::Custom` (the default) a conflicting change is
    /// never auto-resolved — it sits here until the consumer calls
    /// [`Store::retry`] or [`Store::cancel`]. Transitions into and out of
    /// this set are observable via [`Store::sync_status_stream`]
    /// (`SyncStatus::Conflict`).
    pub fn conflicts(&self) -> Vec<PendingChange<T, ID>> {
        self.inner.pending.conflicts()
    }

    /// Re-queues a failed or conflicting change so the next `sync()` applies
    /// it again: a `Save` resubmits its existing payload, a `Delete`
    /// reattempts the delete. Errs with `StoreError::NotFound` if no change
    /// is queued for `id`.
    pub async fn retry(&self, id: &ID) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let Some(change) = self.inner.pending.get(id) else {
            return Err(StoreError::NotFound);
        };
        let now = Utc::now();
        match change.kind {
            ChangeKind::Save => {
                let payload = change
                    .payload
                    .expect("a queued save change always carries a payload");
                self.inner.pending.requeue(id, payload, now);
            }
            ChangeKind::Delete => self.inner.pending.enqueue_delete(id.clone(), now),
        }
        self.recompute_health().await;
        Ok(())
    }

    /// Drops a failed or conflicting change from the queue without applying
    /// it. Errs with `StoreError::NotFound` if no change is queued for `id`.
    pub async fn cancel(&self, id: &ID) -> Result<(), StoreError> {
        self.ensure_ready()?;
        if self.inner.pending.get(id).is_none() {
            return Err(StoreError::NotFound);
        }
        self.inner.pending.discard(id);
        self.recompute_health().await;
        Ok(())
    }
}
