//! Bounded LRU cache of store reads keyed by absolute path.
//!
//! Entries are immutable snapshots replaced wholesale on every refresh. The
//! cache never talks to the store: a miss means "unknown", and the caller
//! owns the read-through. Paths are spread over independently locked LRU
//! segments so unrelated paths do not contend.
//!
//! Each segment carries an invalidation epoch bumped by every `remove` and
//! `clear`. A reader takes [`PathCache::epoch`] before its store read and
//! fills with [`PathCache::put_if_current`], so a snapshot read before an
//! invalidation can never be written back after it.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::CACHE_HITS;
use crate::metrics::CACHE_MISSES;
use crate::CacheConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCacheEntry {
    pub version: u64,
    pub data: Option<Vec<u8>>,
    pub children: Option<Vec<String>>,
    pub last_refreshed_at: Instant,
}

impl PathCacheEntry {
    pub fn age(&self) -> Duration {
        self.last_refreshed_at.elapsed()
    }
}

struct Segment {
    entries: LruCache<String, Arc<PathCacheEntry>>,
    epoch: u64,
}

pub struct PathCache {
    segments: Vec<Mutex<Segment>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PathCache {
    pub fn new(
        capacity: usize,
        segments: usize,
    ) -> Self {
        let segments = segments.clamp(1, capacity.max(1));
        let per_segment = NonZeroUsize::new(capacity.div_ceil(segments).max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            segments: (0..segments)
                .map(|_| {
                    Mutex::new(Segment {
                        entries: LruCache::new(per_segment),
                        epoch: 0,
                    })
                })
                .collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.shards)
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<Arc<PathCacheEntry>> {
        let entry = self.segment(path).lock().entries.get(path).cloned();
        self.record(entry.is_some());
        entry
    }

    /// Like [`PathCache::get`] but an entry older than `ttl` counts as a miss.
    pub fn get_with_ttl(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Option<Arc<PathCacheEntry>> {
        let entry = self
            .segment(path)
            .lock()
            .entries
            .get(path)
            .filter(|e| e.age() <= ttl)
            .cloned();
        self.record(entry.is_some());
        entry
    }

    /// Unconditionally replaces the entry for `path`.
    pub fn put(
        &self,
        path: &str,
        version: u64,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> Arc<PathCacheEntry> {
        let entry = Self::entry(version, data, children);
        self.segment(path).lock().entries.put(path.to_string(), entry.clone());
        entry
    }

    /// Invalidation epoch covering `path`. Take it before the store read
    /// whose result will be passed to [`PathCache::put_if_current`].
    pub fn epoch(
        &self,
        path: &str,
    ) -> u64 {
        self.segment(path).lock().epoch
    }

    /// Replaces the entry for `path` only if no invalidation happened since
    /// `epoch` was taken. Returns `None` when the snapshot was dropped.
    pub fn put_if_current(
        &self,
        path: &str,
        epoch: u64,
        version: u64,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> Option<Arc<PathCacheEntry>> {
        let mut segment = self.segment(path).lock();
        if segment.epoch != epoch {
            debug!(%path, "Cache invalidated during read, dropping snapshot");
            return None;
        }
        let entry = Self::entry(version, data, children);
        segment.entries.put(path.to_string(), entry.clone());
        Some(entry)
    }

    pub fn remove(
        &self,
        path: &str,
    ) -> Option<Arc<PathCacheEntry>> {
        let removed = {
            let mut segment = self.segment(path).lock();
            // in-flight reads of this path are stale now, cached or not
            segment.epoch += 1;
            segment.entries.pop(path)
        };
        if removed.is_some() {
            debug!(%path, "Removed cache entry");
        }
        removed
    }

    /// Reads without touching LRU order or counters.
    pub fn peek(
        &self,
        path: &str,
    ) -> Option<Arc<PathCacheEntry>> {
        self.segment(path).lock().entries.peek(path).cloned()
    }

    pub fn contains(
        &self,
        path: &str,
    ) -> bool {
        self.segment(path).lock().entries.contains(path)
    }

    pub fn clear(&self) {
        for segment in &self.segments {
            let mut segment = segment.lock();
            segment.epoch += 1;
            segment.entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn entry(
        version: u64,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> Arc<PathCacheEntry> {
        Arc::new(PathCacheEntry {
            version,
            data,
            children,
            last_refreshed_at: Instant::now(),
        })
    }

    fn record(
        &self,
        hit: bool,
    ) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            CACHE_HITS.inc();
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            CACHE_MISSES.inc();
        }
    }

    fn segment(
        &self,
        path: &str,
    ) -> &Mutex<Segment> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.segments[(hasher.finish() as usize) % self.segments.len()]
    }
}
