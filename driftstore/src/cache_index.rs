//! The cache metadata index: per-id last-fetch timestamps and the
//! bidirectional tag inversion used for bulk invalidation.
//!
//! The engine never mirrors entity bytes here — only metadata. Uses the
//! same `DashMap`-concurrent-map idiom as the rest of this crate.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use driftstore_backend::Backend;
use driftstore_core::{FieldAccessor, Query, StoreError, Tag};

/// Per-id cache metadata: when it was last fetched and which tags it
/// belongs to.
#[derive(Debug, Clone)]
struct CacheEntry {
    last_fetch: DateTime<Utc>,
    tags: HashSet<Tag>,
}

/// Point-in-time counters returned by [`CacheIndex::stats`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CacheIndexStats {
    /// Number of ids currently tracked.
    pub tracked_ids: usize,
    /// Number of distinct tags currently in use.
    pub tracked_tags: usize,
}

/// Tracks per-id last-fetch time and tag membership. An id is present here
/// iff it has been observed via a read path and not explicitly removed or
/// invalidated.
///
/// Safe under concurrent readers and a single mutator per id: every
/// operation goes through `DashMap`'s internal sharded locking, so no
/// coarse lock is needed across the whole index.
pub struct CacheIndex<ID> {
    entries: DashMap<ID, CacheEntry>,
    tag_to_ids: DashMap<Tag, HashSet<ID>>,
}

impl<ID> Default for CacheIndex<ID>
where
    ID: Clone + Eq + std::hash::Hash,
{
    fn default() -> Self {
        CacheIndex::new()
    }
}

impl<ID> CacheIndex<ID>
where
    ID: Clone + Eq + std::hash::Hash,
{
    /// Creates an empty index.
    pub fn new() -> Self {
        CacheIndex {
            entries: DashMap::new(),
            tag_to_ids: DashMap::new(),
        }
    }

    /// Records `id` as freshly fetched at `now`, attaching `tags` if any.
    /// Overwrites any previous last-fetch time; merges (does not replace)
    /// the tag set.
    pub fn record(&self, id: ID, tags: impl IntoIterator<Item = Tag>, now: DateTime<Utc>) {
        let mut entry = self.entries.entry(id.clone()).or_insert_with(|| CacheEntry {
            last_fetch: now,
            tags: HashSet::new(),
        });
        entry.last_fetch = now;
        let new_tags: Vec<Tag> = tags.into_iter().collect();
        for tag in &new_tags {
            entry.tags.insert(tag.clone());
        }
        drop(entry);
        for tag in new_tags {
            self.tag_to_ids.entry(tag).or_default().insert(id.clone());
        }
    }

    /// Adds tags to an already-tracked id (a no-op for ids not yet
    /// recorded; tag operations only apply to tracked ids).
    pub fn add_tags(&self, id: &ID, tags: impl IntoIterator<Item = Tag>) {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return;
        };
        for tag in tags {
            entry.tags.insert(tag.clone());
            self.tag_to_ids
                .entry(tag)
                .or_default()
                .insert(id.clone());
        }
    }

    /// Removes tags from `id`, maintaining bidirectionality atomically: a
    /// tag with no remaining ids is dropped from the inversion entirely.
    pub fn remove_tags<'a>(&self, id: &ID, tags: impl IntoIterator<Item = &'a Tag>) {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return;
        };
        for tag in tags {
            entry.tags.remove(tag);
            if let Entry::Occupied(mut occ) = self.tag_to_ids.entry(tag.clone()) {
                occ.get_mut().remove(id);
                if occ.get().is_empty() {
                    occ.remove();
                }
            }
        }
    }

    /// The tags currently attached to `id`.
    pub fn tags_of(&self, id: &ID) -> HashSet<Tag> {
        self.entries
            .get(id)
            .map(|e| e.tags.clone())
            .unwrap_or_default()
    }

    /// All ids carrying at least one of `tags`.
    pub fn ids_with_any_tag(&self, tags: &[Tag]) -> HashSet<ID> {
        let mut out = HashSet::new();
        for tag in tags {
            if let Some(ids) = self.tag_to_ids.get(tag) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// True if `id` is untracked, or tracked but older than `stale_duration`
    /// relative to `now`. An unset `stale_duration` means nothing is ever
    /// stale (an untracked id is still "stale" in the sense that it forces
    /// a sync — absence and staleness share the same downstream handling in
    /// the fetch policy).
    pub fn is_stale(&self, id: &ID, stale_duration: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return true;
        };
        match stale_duration {
            None => false,
            Some(duration) => match chrono::Duration::from_std(duration) {
                Ok(d) => entry.last_fetch + d < now,
                Err(_) => false,
            },
        }
    }

    /// The last-fetch timestamp for `id`, if tracked.
    pub fn last_fetch(&self, id: &ID) -> Option<DateTime<Utc>> {
        self.entries.get(id).map(|e| e.last_fetch)
    }

    /// Clears the last-fetch entry for `id` so the next fetch under any
    /// non-`cacheOnly` policy treats it as stale and consults the backend.
    /// The id's tag memberships are untouched.
    pub fn invalidate(&self, id: &ID) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.last_fetch = DateTime::<Utc>::MIN_UTC;
        }
    }

    /// Invalidates every id tracked by the index.
    pub fn invalidate_all(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.last_fetch = DateTime::<Utc>::MIN_UTC;
        }
    }

    /// Invalidates every id carrying at least one of `tags`. A no-op for an
    /// empty tag set.
    pub fn invalidate_by_tags(&self, tags: &[Tag]) {
        if tags.is_empty() {
            return;
        }
        for id in self.ids_with_any_tag(tags) {
            self.invalidate(&id);
        }
    }

    /// Invalidates every tracked id whose backend-fetched value satisfies
    /// `query`'s filters.
    ///
    /// O(N) over the tracked id set — each candidate is individually
    /// fetched from the backend to evaluate the predicate, since the index
    /// keeps no payload shadow. The spec treats this as an explicit,
    /// user-triggered path; no payload shadow is kept to optimize it.
    pub async fn invalidate_where<T, B>(
        &self,
        query: &Query,
        accessor: &dyn FieldAccessor<T>,
        backend: &B,
    ) -> Result<usize, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        ID: Clone + Send + Sync + 'static,
        B: Backend<T, ID>,
    {
        let candidates: Vec<ID> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut invalidated = 0;
        for id in candidates {
            if let Some(item) = backend.get(&id).await? {
                if query.matches(&item, accessor) {
                    self.invalidate(&id);
                    invalidated += 1;
                }
            }
        }
        Ok(invalidated)
    }

    /// Drops `id` entirely: last-fetch entry and all tag memberships.
    pub fn remove(&self, id: &ID) {
        if let Some((_, entry)) = self.entries.remove(id) {
            for tag in entry.tags {
                if let Entry::Occupied(mut occ) = self.tag_to_ids.entry(tag) {
                    occ.get_mut().remove(id);
                    if occ.get().is_empty() {
                        occ.remove();
                    }
                }
            }
        }
    }

    /// Point-in-time tracked-id/tag counts.
    pub fn stats(&self) -> CacheIndexStats {
        CacheIndexStats {
            tracked_ids: self.entries.len(),
            tracked_tags: self.tag_to_ids.len(),
        }
    }

    /// Evicts the `count` coldest entries (oldest `last_fetch` first), for
    /// the reliability wrapper's memory-pressure hook.
    pub fn evict_lru(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let mut by_age: Vec<(ID, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.last_fetch))
            .collect();
        by_age.sort_by_key(|(_, last_fetch)| *last_fetch);
        let evicted = by_age.len().min(count);
        for (id, _) in by_age.into_iter().take(evicted) {
            self.remove(&id);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn record_then_is_stale_false_without_duration() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [], now());
        assert!(!index.is_stale(&"u1", None, now()));
    }

    #[test]
    fn untracked_id_is_always_stale() {
        let index: CacheIndex<&str> = CacheIndex::new();
        assert!(index.is_stale(&"u1", Some(Duration::from_secs(60)), now()));
    }

    #[test]
    fn stale_after_duration_elapses() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [], now());
        let later = now() + chrono::Duration::seconds(120);
        assert!(index.is_stale(&"u1", Some(Duration::from_secs(60)), later));
    }

    #[test]
    fn tags_round_trip() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [Tag::new("team:a")], now());
        assert!(index.tags_of(&"u1").contains(&Tag::new("team:a")));
        assert!(
            index
                .ids_with_any_tag(&[Tag::new("team:a")])
                .contains("u1")
        );
        index.remove_tags(&"u1", &[Tag::new("team:a")]);
        assert!(!index.tags_of(&"u1").contains(&Tag::new("team:a")));
        assert!(
            !index
                .ids_with_any_tag(&[Tag::new("team:a")])
                .contains("u1")
        );
    }

    #[test]
    fn invalidate_by_empty_tags_is_noop() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [Tag::new("t")], now());
        index.invalidate_by_tags(&[]);
        assert!(!index.is_stale(&"u1", None, now()));
    }

    #[test]
    fn invalidate_forces_stale_even_without_duration() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [], now());
        index.invalidate(&"u1");
        assert!(index.is_stale(&"u1", None, now()));
    }

    #[test]
    fn remove_drops_tag_membership() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("u1", [Tag::new("t")], now());
        index.remove(&"u1");
        assert!(index.ids_with_any_tag(&[Tag::new("t")]).is_empty());
        assert_eq!(index.stats().tracked_ids, 0);
    }

    #[test]
    fn evict_lru_drops_oldest_first() {
        let index: CacheIndex<&str> = CacheIndex::new();
        index.record("old", [], now());
        index.record("new", [], now() + chrono::Duration::seconds(10));
        let evicted = index.evict_lru(1);
        assert_eq!(evicted, 1);
        assert!(index.last_fetch(&"old").is_none());
        assert!(index.last_fetch(&"new").is_some());
    }
}
