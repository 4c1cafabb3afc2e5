//! Write policy execution: save and delete strategies.

use std::hash::Hash;
use std::sync::Arc;

use driftstore_backend::Backend;
use driftstore_core::{Offload, StoreError, WritePolicy};

/// Result of a batch write (`save_all`/`delete_all`): the values handed back
/// (empty for deletes), whether `backend.sync()` ran synchronously, and a
/// swallowed sync error.
#[derive(Debug, Clone)]
pub struct WriteAllOutcome<T> {
    /// The values to hand back to the caller. Empty for deletes.
    pub values: Vec<T>,
    /// Whether `backend.sync()` was invoked synchronously and succeeded.
    pub synced: bool,
    /// A sync error swallowed in favor of the local write, if any.
    pub sync_error: Option<StoreError>,
}

/// Result of a write (save or delete): the value handed back to the caller
/// (for saves — the backend-assigned form of the entity; deletes carry no
/// payload), whether `backend.sync()` ran synchronously, and a sync error
/// that was swallowed because the policy tolerates offline writes.
#[derive(Debug, Clone)]
pub struct WriteOutcome<T> {
    /// The value to hand back to the caller. `None` for deletes.
    pub value: Option<T>,
    /// Whether `backend.sync()` was invoked synchronously and succeeded.
    pub synced: bool,
    /// A sync error swallowed in favor of the local write, if any.
    pub sync_error: Option<StoreError>,
}

/// Executes `policy` for a save, per the write policy table: `cacheAndNetwork`
/// writes locally then syncs, propagating a sync failure while keeping the
/// local write in effect; `networkFirst` writes locally then syncs
/// synchronously, propagating any failure as a hard error; `cacheFirst`
/// writes locally and spawns a background sync, never propagating its
/// failure; `cacheOnly` writes locally and never syncs.
pub async fn execute_save<T, ID, B, O>(
    item: T,
    policy: WritePolicy,
    backend: &Arc<B>,
    offload: &O,
) -> Result<WriteOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    let saved = backend.save(item).await?;
    match policy {
        WritePolicy::CacheAndNetwork => match backend.sync().await {
            Ok(()) => Ok(WriteOutcome {
                value: Some(saved),
                synced: true,
                sync_error: None,
            }),
            Err(err) => Err(err),
        },
        WritePolicy::NetworkFirst => {
            backend.sync().await?;
            Ok(WriteOutcome {
                value: Some(saved),
                synced: true,
                sync_error: None,
            })
        }
        WritePolicy::CacheFirst => {
            let background_backend = Arc::clone(backend);
            offload.spawn("write_cache_first_sync", async move {
                let _ = background_backend.sync().await;
            });
            Ok(WriteOutcome {
                value: Some(saved),
                synced: false,
                sync_error: None,
            })
        }
        WritePolicy::CacheOnly => Ok(WriteOutcome {
            value: Some(saved),
            synced: false,
            sync_error: None,
        }),
    }
}

/// Executes `policy` for a delete, mirroring [`execute_save`]'s ordering.
pub async fn execute_delete<T, ID, B, O>(
    id: &ID,
    policy: WritePolicy,
    backend: &Arc<B>,
    offload: &O,
) -> Result<WriteOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    backend.delete(id).await?;
    match policy {
        WritePolicy::CacheAndNetwork => match backend.sync().await {
            Ok(()) => Ok(WriteOutcome {
                value: None,
                synced: true,
                sync_error: None,
            }),
            Err(err) => Err(err),
        },
        WritePolicy::NetworkFirst => {
            backend.sync().await?;
            Ok(WriteOutcome {
                value: None,
                synced: true,
                sync_error: None,
            })
        }
        WritePolicy::CacheFirst => {
            let background_backend = Arc::clone(backend);
            let background_id = id.clone();
            offload.spawn("delete_cache_first_sync", async move {
                let _ = background_backend.sync().await;
                drop(background_id);
            });
            Ok(WriteOutcome {
                value: None,
                synced: false,
                sync_error: None,
            })
        }
        WritePolicy::CacheOnly => Ok(WriteOutcome {
            value: None,
            synced: false,
            sync_error: None,
        }),
    }
}

/// Batch form of [`execute_save`]: writes the whole slice through
/// `backend.save_all`, then applies the same per-policy sync table.
pub async fn execute_save_all<T, ID, B, O>(
    items: Vec<T>,
    policy: WritePolicy,
    backend: &Arc<B>,
    offload: &O,
) -> Result<WriteAllOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    let saved = backend.save_all(items).await?;
    match policy {
        WritePolicy::CacheAndNetwork => match backend.sync().await {
            Ok(()) => Ok(WriteAllOutcome {
                values: saved,
                synced: true,
                sync_error: None,
            }),
            Err(err) => Err(err),
        },
        WritePolicy::NetworkFirst => {
            backend.sync().await?;
            Ok(WriteAllOutcome {
                values: saved,
                synced: true,
                sync_error: None,
            })
        }
        WritePolicy::CacheFirst => {
            let background_backend = Arc::clone(backend);
            offload.spawn("write_all_cache_first_sync", async move {
                let _ = background_backend.sync().await;
            });
            Ok(WriteAllOutcome {
                values: saved,
                synced: false,
                sync_error: None,
            })
        }
        WritePolicy::CacheOnly => Ok(WriteAllOutcome {
            values: saved,
            synced: false,
            sync_error: None,
        }),
    }
}

/// Batch form of [`execute_delete`]: removes every id through
/// `backend.delete_all`, then applies the same per-policy sync table.
pub async fn execute_delete_all<T, ID, B, O>(
    ids: &[ID],
    policy: WritePolicy,
    backend: &Arc<B>,
    offload: &O,
) -> Result<WriteAllOutcome<T>, StoreError>
where
    T: Clone + Send + Sync + 'static,
    ID: Clone + Eq + Hash + Send + Sync + 'static,
    B: Backend<T, ID> + 'static,
    O: Offload,
{
    backend.delete_all(ids).await?;
    match policy {
        WritePolicy::CacheAndNetwork => match backend.sync().await {
            Ok(()) => Ok(WriteAllOutcome {
                values: Vec::new(),
                synced: true,
                sync_error: None,
            }),
            Err(err) => Err(err),
        },
        WritePolicy::NetworkFirst => {
            backend.sync().await?;
            Ok(WriteAllOutcome {
                values: Vec::new(),
                synced: true,
                sync_error: None,
            })
        }
        WritePolicy::CacheFirst => {
            let background_backend = Arc::clone(backend);
            offload.spawn("delete_all_cache_first_sync", async move {
                let _ = background_backend.sync().await;
            });
            Ok(WriteAllOutcome {
                values: Vec::new(),
                synced: false,
                sync_error: None,
            })
        }
        WritePolicy::CacheOnly => Ok(WriteAllOutcome {
            values: Vec::new(),
            synced: false,
            sync_error: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_core::{BackendCapabilities, Query};
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
        async fn watch(
            &self,
            _id: &String,
        ) -> Result<tokio::sync::watch::Receiver<Option<String>>, StoreError> {
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

    #[tokio::test]
    async fn cache_only_never_calls_sync() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let outcome = execute_save::<String, String, _, _>(
            "a".to_string(),
            WritePolicy::CacheOnly,
            &backend,
            &ImmediateOffload,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value.as_deref(), Some("a"));
        assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_and_network_propagates_sync_failure_but_keeps_local_write() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let result = execute_save::<String, String, _, _>(
            "a".to_string(),
            WritePolicy::CacheAndNetwork,
            &backend,
            &ImmediateOffload,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(backend.value.lock().unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn network_first_propagates_sync_failure() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let result = execute_save::<String, String, _, _>(
            "a".to_string(),
            WritePolicy::NetworkFirst,
            &backend,
            &ImmediateOffload,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cache_first_never_propagates_background_sync_failure() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let outcome = execute_save::<String, String, _, _>(
            "a".to_string(),
            WritePolicy::CacheFirst,
            &backend,
            &ImmediateOffload,
        )
        .await
        .unwrap();
        assert!(!outcome.synced);
        assert!(outcome.sync_error.is_none());
    }

    #[tokio::test]
    async fn delete_cache_only_never_calls_sync() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("a".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let outcome = execute_delete::<String, String, _, _>(
            &"a".to_string(),
            WritePolicy::CacheOnly,
            &backend,
            &ImmediateOffload,
        )
        .await
        .unwrap();
        assert!(outcome.value.is_none());
        assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn save_all_cache_first_defers_sync() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(None),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Ok(()),
        });
        let outcome = execute_save_all::<String, String, _, _>(
            vec!["a".to_string()],
            WritePolicy::CacheFirst,
            &backend,
            &ImmediateOffload,
        )
        .await
        .unwrap();
        assert_eq!(outcome.values, vec!["a".to_string()]);
        assert!(!outcome.synced);
    }

    #[tokio::test]
    async fn delete_all_network_first_propagates_sync_failure() {
        let backend = Arc::new(CountingBackend {
            value: Mutex::new(Some("a".to_string())),
            sync_calls: AtomicUsize::new(0),
            sync_result: || Err(StoreError::Timeout),
        });
        let result = execute_delete_all::<String, String, _, _>(
            &["a".to_string()],
            WritePolicy::NetworkFirst,
            &backend,
            &ImmediateOffload,
        )
        .await;
        assert!(result.is_err());
    }
}
