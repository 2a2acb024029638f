//! In-process document cache using [`moka`].
//!
//! Keyed by collection and partial id, so a lookup never needs the full
//! document id. Only the [`crate::DatabaseStore`] writes entries; everyone
//! else reads clones.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::config::CacheConfig;
use crate::document::Document;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate between 0.0 and 1.0; 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── document cache ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    collection: &'static str,
    partial_id: String,
}

/// Already-loaded documents, one entry per (collection, partial id).
#[derive(Clone)]
pub struct DocumentCache {
    inner: Cache<CacheKey, Document>,
    stats: Arc<CacheStats>,
}

impl DocumentCache {
    pub fn builder() -> DocumentCacheBuilder {
        DocumentCacheBuilder {
            max_capacity: CacheConfig::default().max_capacity,
            ttl: None,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let mut builder = Self::builder().max_capacity(config.max_capacity);
        if let Some(secs) = config.ttl_seconds {
            builder = builder.ttl_seconds(secs);
        }
        builder.build()
    }

    /// Look up a cached document. Returns `None` on miss.
    pub async fn get(&self, collection: &'static str, partial_id: &str) -> Option<Document> {
        let key = CacheKey {
            collection,
            partial_id: partial_id.to_string(),
        };
        match self.inner.get(&key).await {
            Some(document) => {
                self.stats.record_hit();
                debug!(collection, partial_id, "cache hit");
                Some(document)
            }
            None => {
                self.stats.record_miss();
                debug!(collection, partial_id, "cache miss");
                None
            }
        }
    }

    /// Every cached document of `collection`, in no particular order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .map(|(_, document)| document)
            .collect()
    }

    pub(crate) async fn insert(&self, document: Document) {
        let key = CacheKey {
            collection: document.collection(),
            partial_id: document.partial_id().to_string(),
        };
        debug!(collection = key.collection, partial_id = %key.partial_id, "cache insert");
        self.inner.insert(key, document).await;
    }

    pub(crate) async fn remove(&self, collection: &'static str, partial_id: &str) {
        let key = CacheKey {
            collection,
            partial_id: partial_id.to_string(),
        };
        self.inner.invalidate(&key).await;
        debug!(collection, partial_id, "cache invalidate");
    }

    #[cfg(test)]
    fn clear(&self) {
        self.inner.invalidate_all();
        debug!("cache invalidate_all");
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Approximate entry count; exact after [`Self::run_pending_tasks`].
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance (evictions, counters).
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.inner.entry_count())
            .field("stats", &self.stats)
            .finish()
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`DocumentCache`].
#[derive(Debug)]
pub struct DocumentCacheBuilder {
    max_capacity: u64,
    ttl: Option<Duration>,
}

impl DocumentCacheBuilder {
    /// Maximum number of documents held.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    /// Time-to-live in seconds for each entry.
    pub fn ttl_seconds(mut self, secs: u64) -> Self {
        self.ttl = Some(Duration::from_secs(secs));
        self
    }

    pub fn build(self) -> DocumentCache {
        let mut builder = Cache::builder().max_capacity(self.max_capacity);
        if let Some(ttl) = self.ttl {
            builder = builder.time_to_live(ttl);
        }

        debug!(
            max_capacity = self.max_capacity,
            ttl_seconds = self.ttl.map(|ttl| ttl.as_secs()),
            "document cache created"
        );

        DocumentCache {
            inner: builder.build(),
            stats: Arc::new(CacheStats::default()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::testing::{Note, Settings};

    fn note(guild: &str, author: &str) -> Document {
        Note::new(guild, author, "text").to_document().unwrap()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = DocumentCache::builder().max_capacity(100).build();
        cache.insert(note("1", "2")).await;

        let cached = cache.get("Notes", "1/2").await.unwrap();
        assert_eq!(cached.id(), "notes/1/2");
    }

    #[tokio::test]
    async fn keys_are_scoped_by_collection() {
        let cache = DocumentCache::builder().build();
        cache.insert(Settings::new("1").to_document().unwrap()).await;

        assert!(cache.get("Notes", "1").await.is_none());
        assert!(cache.get("Settings", "1").await.is_some());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let cache = DocumentCache::builder().build();
        cache.insert(note("1", "2")).await;
        cache.insert(note("1", "3")).await;

        cache.remove("Notes", "1/2").await;
        assert!(cache.get("Notes", "1/2").await.is_none());
        assert!(cache.get("Notes", "1/3").await.is_some());

        cache.clear();
        cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn documents_lists_one_collection() {
        let cache = DocumentCache::builder().build();
        cache.insert(note("1", "2")).await;
        cache.insert(note("1", "3")).await;
        cache.insert(Settings::new("1").to_document().unwrap()).await;

        let mut ids: Vec<String> = cache
            .documents("Notes")
            .into_iter()
            .map(|document| document.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["notes/1/2", "notes/1/3"]);
    }

    #[tokio::test]
    async fn stats_tracking() {
        let cache = DocumentCache::from_config(&CacheConfig {
            max_capacity: 10,
            ttl_seconds: Some(60),
        });
        cache.insert(note("1", "2")).await;

        let _ = cache.get("Notes", "1/2").await;
        let _ = cache.get("Notes", "9/9").await;
        let _ = cache.get("Notes", "8/8").await;

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
        assert_eq!(cache.stats().total(), 3);
        assert!((cache.stats().hit_rate() - (1.0 / 3.0)).abs() < 0.01);
    }
}
