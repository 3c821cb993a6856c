//! Bounded query caches.
//!
//! Two levels: the unsorted filter result for a normalized rule set, and the finished page
//! for a full request. Both are only valid for the dataset handle they were computed
//! against; [`QueryCache::invalidate`] drops everything at once.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;

use filmlist_core::{QueryRequest, ResultPage, RuleSet, ShowRow};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Fixed-capacity map with least-recently-used eviction.
///
/// Every access stamps the entry with a fresh tick; `order` maps ticks back to keys so the
/// oldest entry is the first one in the tree.
pub struct LruCache<K, V> {
    map: FxHashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
    cap: usize,
    evicted: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// A capacity of zero disables the cache.
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: BTreeMap::new(), tick: 0, cap, evicted: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn evicted(&self) -> u64 { self.evicted }

    pub fn contains(&self, key: &K) -> bool { self.map.contains_key(key) }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let entry = self.map.get_mut(key)?;
        self.tick += 1;
        let old = std::mem::replace(&mut entry.1, self.tick);
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(self.tick, k);
        }
        Some(&entry.0)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.cap == 0 {
            return;
        }
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.map.get_mut(&key) {
            let old = std::mem::replace(&mut entry.1, tick);
            entry.0 = value;
            self.order.remove(&old);
            self.order.insert(tick, key);
            return;
        }
        if self.map.len() >= self.cap {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.map.remove(&oldest);
                self.evicted += 1;
            }
        }
        self.order.insert(tick, key.clone());
        self.map.insert(key, (value, tick));
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// Key of an unsorted filter result: the normalized rules and the row cap the store was
/// asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub rules: RuleSet,
    pub cap: usize,
}

impl FilterKey {
    pub fn new(request: &QueryRequest, cap: usize) -> Self {
        Self { rules: request.rules().clone(), cap }
    }
}

/// Key of a finished page: the normalized request (rules, page, page size, sort).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(QueryRequest);

impl From<&QueryRequest> for QueryKey {
    fn from(request: &QueryRequest) -> Self { QueryKey(request.clone()) }
}

pub struct QueryCache {
    filtered: LruCache<FilterKey, Arc<Vec<ShowRow>>>,
    pages: LruCache<QueryKey, Arc<ResultPage>>,
    invalidations: u64,
}

impl QueryCache {
    pub fn new(filter_capacity: usize, page_capacity: usize) -> Self {
        Self {
            filtered: LruCache::with_capacity(filter_capacity),
            pages: LruCache::with_capacity(page_capacity),
            invalidations: 0,
        }
    }

    pub fn page(&mut self, key: &QueryKey) -> Option<Arc<ResultPage>> {
        let hit = self.pages.get(key).cloned();
        record("page", hit.is_some());
        hit
    }

    pub fn filtered(&mut self, key: &FilterKey) -> Option<Arc<Vec<ShowRow>>> {
        let hit = self.filtered.get(key).cloned();
        record("filter", hit.is_some());
        hit
    }

    pub fn store(&mut self, filter_key: FilterKey, rows: Arc<Vec<ShowRow>>, key: QueryKey, page: Arc<ResultPage>) {
        self.filtered.insert(filter_key, rows);
        self.pages.insert(key, page);
    }

    /// Drop every entry. Called whenever the dataset handle changes.
    pub fn invalidate(&mut self) {
        let (filtered, pages) = (self.filtered.len(), self.pages.len());
        self.filtered.clear();
        self.pages.clear();
        self.invalidations += 1;
        counter!("query_cache_invalidations_total", 1u64);
        debug!(filtered, pages, "query cache invalidated");
    }

    pub fn filtered_len(&self) -> usize { self.filtered.len() }
    pub fn pages_len(&self) -> usize { self.pages.len() }
    pub fn invalidations(&self) -> u64 { self.invalidations }
}

fn record(level: &'static str, hit: bool) {
    if hit {
        counter!("query_cache_hits_total", 1u64, "level" => level);
    } else {
        counter!("query_cache_misses_total", 1u64, "level" => level);
    }
}
