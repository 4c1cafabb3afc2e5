//! Fetch policy execution: the single-id and list-form read strategies.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use driftstore_backend::Backend;
use driftstore_core::{FetchPolicy, FieldAccessor, Offload, PagedResult, Query, StoreError};

use crate::cache_index::CacheIndex;
use crate::reactive::SubscriptionRegistry;

/// Everything a backgrounded `staleWhileRevalidate` refresh needs to publish
/// its re-fetched value to reactive subscribers once the sync it kicked off
/// completes, since the caller that triggered it has already returned.
pub struct RevalidatePublisher<T, ID> {
    pub subscriptions: Arc<SubscriptionRegistry<T, ID>>,
    pub id_of: Arc<dyn Fn(&T) -> ID + Send + Sync>,
    pub accessor: Arc<dyn FieldAccessor<T>>,
}

impl<T, ID> Clone for RevalidatePublisher<T, ID> {
    fn clone(&self) -> Self {
        RevalidatePublisher {
            subscriptions: Arc::clone(&self.subscriptions),
            id_of: Arc::clone(&self.id_of),
            accessor: Arc::clone(&self.accessor),
        }
    }
}

/// Result of a single-id fetch: the value found (if any), whether a backend
/// sync ran, and the sync error when one occurred but a fallback value was
/// still returned.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    /// The value to hand back to the caller, if one was found.
    pub value: Option<T>,
    /// Whether `backend.sync()` was invoked and succeeded.
    pub synced: bool,
    /// A sync error that was swallowed in favor of a cache fallback, if any.
    pub sync_error: Option<StoreError>,
}

/// Result of a list-form fetch.
#[derive(Debug, Clone)]
pub struct FetchAllOutcome<T> {
    /// The page returned to the caller.
    pub items: PagedResult<T>,
    /// Whether `backend.sync()` was invoked and succeeded.
    pub synced: bool,
    /// A sync error that was swallowed in favor of a cache fallback, if any.
    pub sync_error: Option<StoreError>,
}

/// Executes `policy` for a single id, per the fetch policy table: `cacheFirst`
/// reads the cache and only syncs when absent or stale; `networkFirst` syncs
/// first and falls back to whatever the backend has locally on failure;
/// `cacheAndNetwork` returns the cached value immediately while syncing in
/// the background for reactive consumers, but a direct call here waits for
/// the sync and returns the post-sync value if it succeeded, else the cached
/// one; `cacheOnly` never syncs; `networkOnly` always syncs and propagates
/// failure; `staleWhileRevalidate` returns a cached value immediately and
/// spawns a best-effort background sync, or waits for sync when nothing is
/// cached yet. `publish`, when given, lets that background sync push its
/// re-fetched value to reactive subscribers once it completes — the
/// original caller has already returned by then.
pub async fn execute<T, ID, B, O>(
    id: &ID,
    policy: FetchPolicy,
    backend: &Arc<B>,
    cache_index: &Arc<CacheIndex<ID>>,
    stale_duration: Option<Duration>,
    now: DateTime<Utc>,
    offload: &O,
    publish: Option<&RevalidatePublisher<T, ID>>,
) -> Result<FetchOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    match policy {
        FetchPolicy::CacheFirst => {
            if !cache_index.is_stale(id, stale_duration, now) {
                if let Some(value) = backend.get(id).await? {
                    return Ok(FetchOutcome {
                        value: Some(value),
                        synced: false,
                        sync_error: None,
                    });
                }
            }
            sync_then_read(id, backend, cache_index, now).await
        }
        FetchPolicy::NetworkFirst => sync_then_read(id, backend, cache_index, now).await,
        FetchPolicy::CacheAndNetwork => {
            let cached = backend.get(id).await?;
            match backend.sync().await {
                Ok(()) => {
                    cache_index.record(id.clone(), [], now);
                    let fresh = backend.get(id).await?;
                    Ok(FetchOutcome {
                        value: fresh.or(cached),
                        synced: true,
                        sync_error: None,
                    })
                }
                Err(err) => Ok(FetchOutcome {
                    value: cached,
                    synced: false,
                    sync_error: Some(err),
                }),
            }
        }
        FetchPolicy::CacheOnly => {
            let value = backend.get(id).await?;
            Ok(FetchOutcome {
                value,
                synced: false,
                sync_error: None,
            })
        }
        FetchPolicy::NetworkOnly => {
            backend.sync().await?;
            cache_index.record(id.clone(), [], now);
            let value = backend.get(id).await?;
            Ok(FetchOutcome {
                value,
                synced: true,
                sync_error: None,
            })
        }
        FetchPolicy::StaleWhileRevalidate => match backend.get(id).await? {
            Some(value) => {
                let background_backend = Arc::clone(backend);
                let background_index = Arc::clone(cache_index);
                let background_id = id.clone();
                let background_publish = publish.cloned();
                offload.spawn("stale_while_revalidate", async move {
                    if background_backend.sync().await.is_ok() {
                        background_index.record(background_id.clone(), [], Utc::now());
                        if let (Ok(Some(revalidated)), Some(publisher)) =
                            (background_backend.get(&background_id).await, background_publish)
                        {
                            let revalidated = Arc::new(revalidated);
                            publisher.subscriptions.notify_upsert(
                                &background_id,
                                revalidated,
                                |v| (publisher.id_of)(v),
                                publisher.accessor.as_ref(),
                            );
                        }
                    }
                });
                Ok(FetchOutcome {
                    value: Some(value),
                    synced: false,
                    sync_error: None,
                })
            }
            None => sync_then_read(id, backend, cache_index, now).await,
        },
    }
}

async fn sync_then_read<T, ID, B>(
    id: &ID,
    backend: &Arc<B>,
    cache_index: &Arc<CacheIndex<ID>>,
    now: DateTime<Utc>,
) -> Result<FetchOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID>,
{
    match backend.sync().await {
        Ok(()) => {
            cache_index.record(id.clone(), [], now);
            let value = backend.get(id).await?;
            Ok(FetchOutcome {
                value,
                synced: true,
                sync_error: None,
            })
        }
        Err(err) => {
            let cached = backend.get(id).await?;
            Ok(FetchOutcome {
                value: cached,
                synced: false,
                sync_error: Some(err),
            })
        }
    }
}

/// List-form counterpart of [`execute`]. "Cached" is judged by a non-empty
/// page rather than `Option::is_some` — there is no single "nil" result for
/// a query.
pub async fn execute_all<T, ID, B, O>(
    query: &Query,
    policy: FetchPolicy,
    backend: &Arc<B>,
    offload: &O,
) -> Result<FetchAllOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    match policy {
        FetchPolicy::CacheFirst => {
            let cached = backend.get_all_paged(query).await?;
            if !cached.items.is_empty() {
                return Ok(FetchAllOutcome {
                    items: cached,
                    synced: false,
                    sync_error: None,
                });
            }
            sync_then_read_all(query, backend).await
        }
        FetchPolicy::NetworkFirst => sync_then_read_all(query, backend).await,
        FetchPolicy::CacheAndNetwork => {
            let cached = backend.get_all_paged(query).await?;
            match backend.sync().await {
                Ok(()) => {
                    let fresh = backend.get_all_paged(query).await?;
                    Ok(FetchAllOutcome {
                        items: fresh,
                        synced: true,
                        sync_error: None,
                    })
                }
                Err(err) => Ok(FetchAllOutcome {
                    items: cached,
                    synced: false,
                    sync_error: Some(err),
                }),
            }
        }
        FetchPolicy::CacheOnly => {
            let items = backend.get_all_paged(query).await?;
            Ok(FetchAllOutcome {
                items,
                synced: false,
                sync_error: None,
            })
        }
        FetchPolicy::NetworkOnly => {
            backend.sync().await?;
            let items = backend.get_all_paged(query).await?;
            Ok(FetchAllOutcome {
                items,
                synced: true,
                sync_error: None,
            })
        }
        FetchPolicy::StaleWhileRevalidate => {
            let cached = backend.get_all_paged(query).await?;
            if !cached.items.is_empty() {
                let background_backend = Arc::clone(backend);
                offload.spawn("stale_while_revalidate_all", async move {
                    let _ = background_backend.sync().await;
                });
                Ok(FetchAllOutcome {
                    items: cached,
                    synced: false,
                    sync_error: None,
                })
            } else {
                sync_then_read_all(query, backend).await
            }
        }
    }
}

async fn sync_then_read_all<T, ID, B>(
    query: &Query,
    backend: &Arc<B>,
) -> Result<FetchAllOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID>,
{
    match backend.sync().await {
        Ok(()) => {
            let items = backend.get_all_paged(query).await?;
            Ok(FetchAllOutcome {
                items,
                synced: true,
                sync_error: None,
            })
        }
        Err(err) => {
            let cached = backend.get_all_paged(query).await?;
            Ok(FetchAllOutcome {
                items: cached,
                synced: false,
                sync_error: Some(err),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_core::{BackendCapabilities, OperationContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingBackend {
        value: Mutex<Option<String>>,
        sync_calls: AtomicUsize,
        sync_result: fn() -> Result<(), StoreError>,
    }

    #[async_trait::async_trait]
    impl Backend<String, String> for CountingBackend {
        async fn get(&self, _id: &String) -> Result<Option<String>, StoreError> {
            Ok(self.value.lock().unwrap().clone())
        }
        async fn get_all(&self, _query: Option<&Query>) -> Result<Vec<String>, StoreError> {
            Ok(self.value.lock().unwrap().iter().cloned().collect())
        }
        async fn watch(&self, _id: &String) -> Result<tokio::sync::watch::Receiver<Option<String>>, StoreError> {
            unimplemented!()
        }
        async fn watch_all(
            &self,
            _query: Option<&Query>,
        ) -> Result<tokio::sync::watch::Receiver<Vec<String>>, StoreError> {
            unimplemented!()
        }
        async fn save(&self, item: String) -> Result<String, StoreError> {
            *self.value.lock().unwrap() = Some(item.clone());
            Ok(item)
        }
        async fn save_all(&self, items: Vec<String>) -> Result<Vec<String>, StoreError> {
            Ok(items)
        }
        async fn delete(&self, _id: &String) -> Result<bool, StoreError> {
            Ok(self.value.lock().unwrap().take().is_some())
        }
        async fn delete_all(&self, ids: &[String]) -> Result<usize, StoreError> {
            Ok(ids.len())
        }
        async fn delete_where(&self, _query: &Query) -> Result<usize, StoreError> {
            Ok(0)
        }
        async fn initialize(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }
        async fn sync(&self) -> Result<(), StoreError> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            (self.sync_result)()
        }
    }

    #[derive(Clone)]
    struct ImmediateOffload;

    impl Offload for ImmediateOffload {
        fn spawn<F>(&self, _kind: impl Into<smol_str::SmolStr>, future: F)
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future);
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn cache_only_never_calls_sync() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("cached".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let index = Arc::new(CacheIndex::new());
        let outcome = execute(
            &"id".to_string(),
            FetchPolicy::CacheOnly,
            &backend,
            &index,
            None,
            now(),
            &ImmediateOffload,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value.as_deref(), Some("cached"));
        assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn network_first_falls_back_to_cache_on_sync_failure() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("cached".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let index = Arc::new(CacheIndex::new());
        let outcome = execute(
            &"id".to_string(),
            FetchPolicy::NetworkFirst,
            &backend,
            &index,
            None,
            now(),
            &ImmediateOffload,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value.as_deref(), Some("cached"));
        assert!(outcome.sync_error.is_some());
        assert!(!outcome.synced);
    }

    #[tokio::test]
    async fn network_only_propagates_sync_failure() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let index = Arc::new(CacheIndex::new());
        let result = execute(
            &"id".to_string(),
            FetchPolicy::NetworkOnly,
            &backend,
            &index,
            None,
            now(),
            &ImmediateOffload,
            None,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cache_first_skips_sync_when_fresh() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("cached".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let index = Arc::new(CacheIndex::new());
        index.record("id".to_string(), [], now());
        let outcome = execute(
            &"id".to_string(),
            FetchPolicy::CacheFirst,
            &backend,
            &index,
            Some(Duration::from_secs(60)),
            now(),
            &ImmediateOffload,
            None,
        )
        .await
        .unwrap();
        assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.value.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn stale_while_revalidate_waits_for_sync_when_empty() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let index = Arc::new(CacheIndex::new());
        let _ = execute(
            &"id".to_string(),
            FetchPolicy::StaleWhileRevalidate,
            &backend,
            &index,
            None,
            now(),
            &ImmediateOffload,
            None,
        )
        .await
        .unwrap();
        assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 1);
        let _ = OperationContext::new(driftstore_core::OperationKind::Get);
    }

    struct StringAccessor;

    impl FieldAccessor<String> for StringAccessor {
        fn get(&self, item: &String, field: &str) -> Option<driftstore_core::FieldValue> {
            match field {
                "value" => Some(driftstore_core::FieldValue::Str(item.clone())),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn stale_while_revalidate_publishes_background_refresh_to_subscribers() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("stale".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let index = Arc::new(CacheIndex::new());
        let subscriptions: Arc<SubscriptionRegistry<String, String>> = Arc::new(SubscriptionRegistry::default());
        let mut watcher = subscriptions.watch(&"id".to_string(), || None);
        let publisher = RevalidatePublisher {
            subscriptions: Arc::clone(&subscriptions),
            id_of: Arc::new(|v: &String| v.clone()),
            accessor: Arc::new(StringAccessor),
        };

        let outcome = execute(
            &"id".to_string(),
            FetchPolicy::StaleWhileRevalidate,
            &backend,
            &index,
            None,
            now(),
            &ImmediateOffload,
            Some(&publisher),
        )
        .await
        .unwrap();
        assert_eq!(outcome.value.as_deref(), Some("stale"), "the immediate read returns the pre-sync cached value");

        *backend.value.lock().unwrap() = Some("fresh".to_string());
        // Let the spawned revalidation task run and publish its result.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(watcher.has_changed().unwrap());
        assert_eq!(
            watcher.borrow_and_update().as_deref().map(|v| v.as_str()),
            Some("fresh"),
            "the background-revalidated value must reach subscribers, not just the cache index"
        );
    }
}
