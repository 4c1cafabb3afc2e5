//! An in-memory `Backend` test double with call counters and configurable
//! latency/failure injection.

use std::cmp::Ordering as CmpOrdering;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use driftstore_backend::{Backend, BackendCapabilities};
use driftstore_core::{FieldAccessor, PagedResult, Query, StoreError};

/// Per-operation call counters, readable without disturbing the backend.
#[derive(Debug, Default)]
pub struct BackendCounters {
    /// Number of `get`/`get_all` calls.
    pub read_count: AtomicUsize,
    /// Number of `get`/`get_all` calls that found something.
    pub read_hit_count: AtomicUsize,
    /// Number of `get`/`get_all` calls that found nothing.
    pub read_miss_count: AtomicUsize,
    /// Number of `save`/`save_all` calls.
    pub write_count: AtomicUsize,
    /// Number of `delete`/`delete_all`/`delete_where` calls.
    pub remove_count: AtomicUsize,
    /// Number of `sync` calls.
    pub sync_count: AtomicUsize,
}

impl BackendCounters {
    /// Reads [`Self::read_count`].
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Reads [`Self::read_hit_count`].
    pub fn read_hit_count(&self) -> usize {
        self.read_hit_count.load(Ordering::SeqCst)
    }

    /// Reads [`Self::read_miss_count`].
    pub fn read_miss_count(&self) -> usize {
        self.read_miss_count.load(Ordering::SeqCst)
    }

    /// Reads [`Self::write_count`].
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Reads [`Self::remove_count`].
    pub fn remove_count(&self) -> usize {
        self.remove_count.load(Ordering::SeqCst)
    }

    /// Reads [`Self::sync_count`].
    pub fn sync_count(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.read_count.store(0, Ordering::SeqCst);
        self.read_hit_count.store(0, Ordering::SeqCst);
        self.read_miss_count.store(0, Ordering::SeqCst);
        self.write_count.store(0, Ordering::SeqCst);
        self.remove_count.store(0, Ordering::SeqCst);
        self.sync_count.store(0, Ordering::SeqCst);
    }
}

/// An in-memory [`Backend`] implementation, keyed by `ID` via a caller-supplied
/// extraction function (the backend has no independent notion of an entity's
/// identity — the same way the facade needs its own `id_of`).
///
/// Supports scripted failures (`fail_next_calls`) and artificial latency
/// (`with_latency`) so retry, circuit-breaker, and timeout behavior can be
/// exercised without a real network.
pub struct InMemoryBackend<T, ID> {
    store: Arc<DashMap<ID, T>>,
    id_of: Arc<dyn Fn(&T) -> ID + Send + Sync>,
    accessor: Arc<dyn FieldAccessor<T>>,
    capabilities: BackendCapabilities,
    counters: Arc<BackendCounters>,
    latency: Option<Duration>,
    fail_next: Arc<AtomicUsize>,
    fail_with: Arc<Mutex<Arc<dyn Fn() -> StoreError + Send + Sync>>>,
}

impl<T, ID> Clone for InMemoryBackend<T, ID> {
    fn clone(&self) -> Self {
        InMemoryBackend {
            store: Arc::clone(&self.store),
            id_of: Arc::clone(&self.id_of),
            accessor: Arc::clone(&self.accessor),
            capabilities: self.capabilities,
            counters: Arc::clone(&self.counters),
            latency: self.latency,
            fail_next: Arc::clone(&self.fail_next),
            fail_with: Arc::clone(&self.fail_with),
        }
    }
}

impl<T, ID> InMemoryBackend<T, ID>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + Debug + 'static,
{
    /// Builds an empty backend. `id_of` extracts an entity's identifier;
    /// `accessor` evaluates `Query` filters/sort against entities.
    pub fn new(id_of: impl Fn(&T) -> ID + Send + Sync + 'static, accessor: Arc<dyn FieldAccessor<T>>) -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            id_of: Arc::new(id_of),
            accessor,
            capabilities: BackendCapabilities {
                supports_offline: true,
                supports_concurrent_calls: true,
                ..BackendCapabilities::default()
            },
            counters: Arc::new(BackendCounters::default()),
            latency: None,
            fail_next: Arc::new(AtomicUsize::new(0)),
            fail_with: Arc::new(Mutex::new(Arc::new(|| {
                StoreError::Network("injected failure".into())
            }))),
        }
    }

    /// Overrides the advertised capability flags.
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adds artificial latency before every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Preloads `items` directly, bypassing `save`/counters.
    pub fn seed(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            let id = (self.id_of)(&item);
            self.store.insert(id, item);
        }
    }

    /// Schedules the next `n` operations to fail with `error()`.
    pub fn fail_next_calls(&self, n: usize, error: impl Fn() -> StoreError + Send + Sync + 'static) {
        *self.fail_with.lock().unwrap() = Arc::new(error);
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Call counters accumulated so far.
    pub fn counters(&self) -> &BackendCounters {
        &self.counters
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    async fn before_call(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            let error = self.fail_with.lock().unwrap().clone();
            return Err(error());
        }
        Ok(())
    }

    fn matching(&self, query: Option<&Query>) -> Vec<T> {
        let mut items: Vec<T> = self
            .store
            .iter()
            .map(|e| e.value().clone())
            .filter(|item| query.is_none_or(|q| q.matches(item, self.accessor.as_ref())))
            .collect();

        if let Some(query) = query {
            for key in query.sort_keys().iter().rev() {
                items.sort_by(|a, b| {
                    let av = self.accessor.get(a, key.field.as_str());
                    let bv = self.accessor.get(b, key.field.as_str());
                    let ordering = match (av, bv) {
                        (Some(a), Some(b)) => a.compare(&b).unwrap_or(CmpOrdering::Equal),
                        (None, Some(_)) => CmpOrdering::Less,
                        (Some(_), None) => CmpOrdering::Greater,
                        (None, None) => CmpOrdering::Equal,
                    };
                    if key.ascending { ordering } else { ordering.reverse() }
                });
            }
            let offset = query.offset_value();
            items = items.into_iter().skip(offset).collect();
            if let Some(limit) = query.limit() {
                items.truncate(limit);
            }
        }
        items
    }
}

#[async_trait]
impl<T, ID> Backend<T, ID> for InMemoryBackend<T, ID>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + Debug + 'static,
{
    async fn get(&self, id: &ID) -> Result<Option<T>, StoreError> {
        self.before_call().await?;
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        let result = self.store.get(id).map(|v| v.value().clone());
        if result.is_some() {
            self.counters.read_hit_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.read_miss_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>, StoreError> {
        self.before_call().await?;
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching(query))
    }

    async fn watch(&self, id: &ID) -> Result<tokio::sync::watch::Receiver<Option<T>>, StoreError> {
        self.before_call().await?;
        let current = self.store.get(id).map(|v| v.value().clone());
        let (_tx, rx) = tokio::sync::watch::channel(current);
        Ok(rx)
    }

    async fn watch_all(&self, query: Option<&Query>) -> Result<tokio::sync::watch::Receiver<Vec<T>>, StoreError> {
        self.before_call().await?;
        let (_tx, rx) = tokio::sync::watch::channel(self.matching(query));
        Ok(rx)
    }

    async fn save(&self, item: T) -> Result<T, StoreError> {
        self.before_call().await?;
        self.counters.write_count.fetch_add(1, Ordering::SeqCst);
        let id = (self.id_of)(&item);
        self.store.insert(id, item.clone());
        Ok(item)
    }

    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>, StoreError> {
        self.before_call().await?;
        self.counters.write_count.fetch_add(1, Ordering::SeqCst);
        for item in &items {
            let id = (self.id_of)(item);
            self.store.insert(id, item.clone());
        }
        Ok(items)
    }

    async fn delete(&self, id: &ID) -> Result<bool, StoreError> {
        self.before_call().await?;
        self.counters.remove_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.remove(id).is_some())
    }

    async fn delete_all(&self, ids: &[ID]) -> Result<usize, StoreError> {
        self.before_call().await?;
        self.counters.remove_count.fetch_add(1, Ordering::SeqCst);
        Ok(ids.iter().filter(|id| self.store.remove(*id).is_some()).count())
    }

    async fn delete_where(&self, query: &Query) -> Result<usize, StoreError> {
        self.before_call().await?;
        self.counters.remove_count.fetch_add(1, Ordering::SeqCst);
        let matching_ids: Vec<ID> = self
            .store
            .iter()
            .filter(|e| query.matches(e.value(), self.accessor.as_ref()))
            .map(|e| e.key().clone())
            .collect();
        for id in &matching_ids {
            self.store.remove(id);
        }
        Ok(matching_ids.len())
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.before_call().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.before_call().await
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn sync(&self) -> Result<(), StoreError> {
        self.before_call().await?;
        self.counters.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_all_paged(&self, query: &Query) -> Result<PagedResult<T>, StoreError> {
        self.before_call().await?;
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(PagedResult::unpaged(self.matching(Some(query))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_core::query::Filter;
    use driftstore_core::{FieldValue, Operator};

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        id: String,
        priority: i64,
    }

    struct WidgetAccessor;
    impl FieldAccessor<Widget> for WidgetAccessor {
        fn get(&self, item: &Widget, field: &str) -> Option<FieldValue> {
            match field {
                "id" => Some(FieldValue::Str(item.id.clone())),
                "priority" => Some(FieldValue::Int(item.priority)),
                _ => None,
            }
        }
    }

    fn backend() -> InMemoryBackend<Widget, String> {
        InMemoryBackend::new(|w: &Widget| w.id.clone(), Arc::new(WidgetAccessor))
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let backend = backend();
        backend
            .save(Widget { id: "w1".into(), priority: 1 })
            .await
            .unwrap();
        let found = backend.get(&"w1".to_string()).await.unwrap();
        assert_eq!(found, Some(Widget { id: "w1".into(), priority: 1 }));
        assert_eq!(backend.counters().read_hit_count(), 1);
    }

    #[tokio::test]
    async fn get_all_filters_by_query() {
        let backend = backend();
        backend.seed([
            Widget { id: "a".into(), priority: 1 },
            Widget { id: "b".into(), priority: 5 },
        ]);
        let query = Query::new().filter(Filter::new("priority", Operator::Ge, FieldValue::Int(3)));
        let found = backend.get_all(Some(&query)).await.unwrap();
        assert_eq!(found, vec![Widget { id: "b".into(), priority: 5 }]);
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_once() {
        let backend = backend();
        backend.fail_next_calls(1, || StoreError::Timeout);
        let err = backend.get(&"missing".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
        assert!(backend.get(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_where_removes_matching_entities() {
        let backend = backend();
        backend.seed([
            Widget { id: "a".into(), priority: 1 },
            Widget { id: "b".into(), priority: 9 },
        ]);
        let query = Query::new().filter(Filter::new("priority", Operator::Ge, FieldValue::Int(5)));
        let removed = backend.delete_where(&query).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.len(), 1);
    }
}
