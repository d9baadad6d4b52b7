//! Fused-result cache keyed by normalized query, `top_k` and filters.
//!
//! Entries are replaced whole and carry the index version they were computed
//! against; an entry from another version or past its expiry is treated as a
//! miss and evicted. Routed turns and plain searches keep separate entries
//! since a routed turn may have searched with a rewritten query.

use std::hash::Hasher;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use twox_hash::XxHash64;

use incidentqa_core::config::CacheSettings;
use incidentqa_core::types::{FusedResult, IndexMeta, RoutingPlan, SearchFilters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query_hash: u64,
    pub top_k: usize,
    pub filters_hash: u64,
    pub routed: bool,
}

impl CacheKey {
    /// Key of a plain search, built from what the caller asked for.
    pub fn new(query: &str, top_k: usize, filters: &SearchFilters) -> Self {
        Self {
            query_hash: xxh64(normalize_query(query).as_bytes()),
            top_k,
            filters_hash: xxh64(filters.canonical().as_bytes()),
            routed: false,
        }
    }

    /// Key of a conversational turn. Built from the request before routing, so
    /// a repeated question finds the entry whatever the router rewrote.
    pub fn routed(query: &str, top_k: usize, filters: &SearchFilters) -> Self {
        Self { routed: true, ..Self::new(query, top_k, filters) }
    }
}

/// Lowercase with whitespace runs collapsed.
pub fn normalize_query(query: &str) -> String { query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase() }

fn xxh64(bytes: &[u8]) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(bytes);
    h.finish()
}

#[derive(Debug)]
pub struct CacheEntry {
    pub results: Vec<FusedResult>,
    pub index_meta: IndexMeta,
    /// Plan the results were retrieved under; routed entries only.
    pub plan: Option<RoutingPlan>,
    pub expires_at: Instant,
}

pub struct ResultCache {
    inner: Cache<CacheKey, Arc<CacheEntry>>,
    ttl: Duration,
    enabled: bool,
}

impl ResultCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_ttl(settings.enabled, settings.max_entries, Duration::from_secs(settings.ttl_secs))
    }

    pub fn with_ttl(enabled: bool, max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder().max_capacity(max_entries).time_to_live(ttl.max(Duration::from_millis(1))).build();
        Self { inner, ttl, enabled }
    }

    pub fn enabled(&self) -> bool { self.enabled }

    /// Fresh entry for `key` computed against `index_version`, if any.
    pub fn get(&self, key: &CacheKey, index_version: u64) -> Option<Arc<CacheEntry>> {
        if !self.enabled { return None; }
        let entry = self.inner.get(key)?;
        if entry.index_meta.index_version != index_version || Instant::now() >= entry.expires_at {
            self.inner.invalidate(key);
            return None;
        }
        Some(entry)
    }

    pub fn put(&self, key: CacheKey, results: Vec<FusedResult>, index_meta: IndexMeta, plan: Option<RoutingPlan>) {
        if !self.enabled { return; }
        let entry = CacheEntry { results, index_meta, plan, expires_at: Instant::now() + self.ttl };
        self.inner.insert(key, Arc::new(entry));
    }

    pub fn invalidate_all(&self) { self.inner.invalidate_all(); }

    pub fn len(&self) -> u64 { self.inner.entry_count() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
