//! The reactive subscription layer: latest-value streams keyed by entity id
//! and by query fingerprint.
//!
//! Built on the `tokio::sync` + `dashmap` stack used throughout this crate.
//! `driftstore_core::LatestValue` supplies the "replay last value"
//! semantics; this module is the keyed registry on top of it, plus an
//! idle-sink reaper that releases sinks nobody is subscribed to anymore.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use driftstore_core::{FieldAccessor, LatestValue, Offload, Query, QueryFingerprint};
use tokio::sync::watch;

/// Default grace period an id/query sink is kept alive after its last
/// subscriber drops, so a subscriber resubscribing shortly after (e.g. a UI
/// remount) still observes the last value instead of re-seeding from
/// scratch.
pub const DEFAULT_IDLE_SINK_TTL: Duration = Duration::from_secs(30);

/// Per-id and per-query-fingerprint latest-value registries.
///
/// Dropping the owning `Store` drops this registry, which drops every
/// `watch::Sender` it holds, closing every live subscriber's stream.
pub struct SubscriptionRegistry<T, ID> {
    by_id: DashMap<ID, LatestValue<Option<Arc<T>>>>,
    by_query: DashMap<QueryFingerprint, (Query, LatestValue<Arc<Vec<Arc<T>>>>)>,
    idle_sink_ttl: Duration,
}

impl<T, ID> Default for SubscriptionRegistry<T, ID>
where
    T: Send + Sync + 'static,
    ID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        SubscriptionRegistry::new(DEFAULT_IDLE_SINK_TTL)
    }
}

impl<T, ID> SubscriptionRegistry<T, ID>
where
    T: Send + Sync + 'static,
    ID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
{
    /// Creates an empty registry with the given idle-sink retention window.
    pub fn new(idle_sink_ttl: Duration) -> Self {
        SubscriptionRegistry {
            by_id: DashMap::new(),
            by_query: DashMap::new(),
            idle_sink_ttl,
        }
    }

    /// Subscribes to the id stream, seeding it with `seed` if this is the
    /// first subscriber. The returned receiver's first `borrow()` observes
    /// either the existing current value or `seed`.
    pub fn watch(&self, id: &ID, seed: impl FnOnce() -> Option<Arc<T>>) -> watch::Receiver<Option<Arc<T>>> {
        let sink = self
            .by_id
            .entry(id.clone())
            .or_insert_with(|| LatestValue::new(seed()));
        sink.subscribe()
    }

    /// Subscribes to a query's result-set stream, seeding it with `seed` if
    /// this is the first subscriber for that fingerprint.
    pub fn watch_all(
        &self,
        query: &Query,
        seed: impl FnOnce() -> Vec<Arc<T>>,
    ) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        let fingerprint = query.fingerprint();
        let entry = self
            .by_query
            .entry(fingerprint)
            .or_insert_with(|| (query.clone(), LatestValue::new(Arc::new(seed()))));
        entry.1.subscribe()
    }

    /// Publishes a fresh value for `id`, and recomputes every active query
    /// stream whose filter is evaluable against it. `id_of` extracts an
    /// entity's id so an existing entry in a query's cached list can be
    /// located and replaced rather than duplicated. A query stream is only
    /// recomputed if it already exists (i.e. has or had a subscriber); this
    /// never creates new query streams.
    pub fn notify_upsert(
        &self,
        id: &ID,
        value: Arc<T>,
        id_of: impl Fn(&T) -> ID,
        accessor: &dyn FieldAccessor<T>,
    ) {
        if let Some(sink) = self.by_id.get(id) {
            sink.publish(Some(value.clone()));
        } else {
            self.by_id.insert(id.clone(), LatestValue::new(Some(value.clone())));
        }
        for mut entry in self.by_query.iter_mut() {
            let (query, sink) = entry.value_mut();
            let mut current = (*sink.get()).clone();
            let position = current.iter().position(|item| id_of(item) == *id);
            let matches = query.matches(value.as_ref(), accessor);
            match (position, matches) {
                (Some(idx), true) => {
                    current[idx] = value.clone();
                    sink.publish(Arc::new(current));
                }
                (Some(idx), false) => {
                    current.remove(idx);
                    sink.publish(Arc::new(current));
                }
                (None, true) => {
                    current.push(value.clone());
                    sink.publish(Arc::new(current));
                }
                (None, false) => {}
            }
        }
    }

    /// Publishes a delete for `id`: the id stream emits `None`, and `id` is
    /// removed from every active query's cached result list.
    pub fn notify_delete(&self, id: &ID, id_of: impl Fn(&T) -> ID) {
        if let Some(sink) = self.by_id.get(id) {
            sink.publish(None);
        }
        for mut entry in self.by_query.iter_mut() {
            let (_, sink) = entry.value_mut();
            let current = sink.get();
            if let Some(idx) = current.iter().position(|item| id_of(item) == *id) {
                let mut next = (*current).clone();
                next.remove(idx);
                sink.publish(Arc::new(next));
            }
        }
    }

    /// Spawns a background reaper (via `offload`) that periodically drops
    /// id/query sinks with zero live receivers after they have sat idle for
    /// `idle_sink_ttl`. Intended to be called once, right after
    /// construction, by the owning `Store::initialize`.
    pub fn spawn_idle_reaper<O>(self: &Arc<Self>, offload: &O)
    where
        O: Offload,
    {
        let registry = Arc::clone(self);
        let ttl = self.idle_sink_ttl;
        offload.spawn("reactive_idle_reap", async move {
            let mut interval = tokio::time::interval(ttl.max(Duration::from_millis(1)));
            loop {
                interval.tick().await;
                registry.reap_idle();
            }
        });
    }

    /// Drops every id/query sink with zero live receivers. Exposed directly
    /// for tests that want deterministic reaping without waiting on the
    /// background interval.
    pub fn reap_idle(&self) {
        self.by_id.retain(|_, sink| sink.receiver_count() > 0);
        self.by_query
            .retain(|_, (_, sink)| sink.receiver_count() > 0);
    }

    /// Number of id streams currently retained (live or idle-but-not-yet-reaped).
    pub fn id_stream_count(&self) -> usize {
        self.by_id.len()
    }

    /// Number of query streams currently retained.
    pub fn query_stream_count(&self) -> usize {
        self.by_query.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_core::{FieldValue, Filter, Operator};

    #[derive(Clone, Debug, PartialEq)]
    struct User {
        id: String,
        active: bool,
    }

    fn id_of(user: &User) -> String {
        user.id.clone()
    }

    struct UserAccessor;
    impl FieldAccessor<User> for UserAccessor {
        fn get(&self, item: &User, field: &str) -> Option<FieldValue> {
            match field {
                "active" => Some(FieldValue::Bool(item.active)),
                "id" => Some(FieldValue::Str(item.id.clone())),
                _ => None,
            }
        }
    }

    #[test]
    fn watch_seeds_current_value_synchronously() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        let seed = Arc::new(User {
            id: "u1".into(),
            active: true,
        });
        let rx = registry.watch(&"u1".to_string(), || Some(seed.clone()));
        assert_eq!(rx.borrow().as_deref(), Some(seed.as_ref()));
    }

    #[test]
    fn notify_upsert_publishes_to_id_stream() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        let mut rx = registry.watch(&"u1".to_string(), || None);
        let value = Arc::new(User {
            id: "u1".into(),
            active: true,
        });
        registry.notify_upsert(&"u1".to_string(), value.clone(), id_of, &UserAccessor);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_deref(), Some(value.as_ref()));
    }

    #[test]
    fn notify_upsert_adds_matching_item_to_query_stream() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        let query = Query::new().filter(Filter::new("active", Operator::Eq, FieldValue::Bool(true)));
        let mut rx = registry.watch_all(&query, Vec::new);
        let value = Arc::new(User {
            id: "u1".into(),
            active: true,
        });
        registry.notify_upsert(&"u1".to_string(), value.clone(), id_of, &UserAccessor);
        assert!(rx.has_changed().unwrap());
        let current = rx.borrow_and_update();
        assert_eq!(current.len(), 1);
        assert!(Arc::ptr_eq(&current[0], &value));
    }

    #[test]
    fn notify_upsert_removes_non_matching_item_from_query_stream() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        let query = Query::new().filter(Filter::new("active", Operator::Eq, FieldValue::Bool(true)));
        let active = Arc::new(User {
            id: "u1".into(),
            active: true,
        });
        let mut rx = registry.watch_all(&query, || vec![active.clone()]);
        let now_inactive = Arc::new(User {
            id: "u1".into(),
            active: false,
        });
        registry.notify_upsert(&"u1".to_string(), now_inactive, id_of, &UserAccessor);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn notify_delete_emits_none_and_clears_query_membership() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        let value = Arc::new(User {
            id: "u1".into(),
            active: true,
        });
        let mut id_rx = registry.watch(&"u1".to_string(), || Some(value.clone()));
        let query = Query::new();
        let mut query_rx = registry.watch_all(&query, || vec![value.clone()]);
        registry.notify_delete(&"u1".to_string(), id_of);
        assert!(id_rx.has_changed().unwrap());
        assert!(id_rx.borrow_and_update().is_none());
        assert!(query_rx.has_changed().unwrap());
        assert!(query_rx.borrow_and_update().is_empty());
    }

    #[test]
    fn reap_idle_drops_sinks_with_no_subscribers() {
        let registry: SubscriptionRegistry<User, String> = SubscriptionRegistry::default();
        {
            let _rx = registry.watch(&"u1".to_string(), || None);
            assert_eq!(registry.id_stream_count(), 1);
        }
        registry.reap_idle();
        assert_eq!(registry.id_stream_count(), 0);
    }
}
