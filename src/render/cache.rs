//! Size-bounded LRU cache of rendered images

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use lru::LruCache;

use super::backend::PageId;
use super::buffer::ImageBuffer;
use super::request::Fingerprint;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Cache key: which page, rendered how
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub page: PageId,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    #[must_use]
    pub const fn new(page: PageId, fingerprint: Fingerprint) -> Self {
        Self { page, fingerprint }
    }
}

/// Counters describing cache state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub limit_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner {
    entries: LruCache<CacheKey, Arc<ImageBuffer>>,
    total_bytes: usize,
    limit_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    fn evict_to(&mut self, budget: usize) {
        while self.total_bytes > budget {
            let Some((key, buffer)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= buffer.size();
            self.evictions += 1;
            debug!(
                "Evicted {} [{}] ({} bytes)",
                key.page,
                key.fingerprint,
                buffer.size()
            );
        }
    }
}

/// Thread-safe render cache shared by every renderer of a document.
///
/// Entries are evicted least-recently-used first whenever the total pixel
/// data would exceed the configured limit. Images are handed out as
/// `Arc`s, so an evicted or invalidated image stays valid for callers
/// already holding it.
pub struct RenderCache {
    inner: Mutex<CacheInner>,
    enabled: AtomicBool,
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::with_size_mb(super::DEFAULT_CACHE_SIZE_MB)
    }
}

impl RenderCache {
    #[must_use]
    pub fn with_size_mb(megabytes: usize) -> Self {
        Self::with_limit_bytes(megabytes.saturating_mul(BYTES_PER_MB))
    }

    #[must_use]
    pub fn with_limit_bytes(limit_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                limit_bytes,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            enabled: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an image, promoting it in LRU order. Always misses while
    /// the cache is disabled.
    #[must_use]
    pub fn get(&self, page: PageId, fingerprint: Fingerprint) -> Option<Arc<ImageBuffer>> {
        if !self.is_enabled() {
            return None;
        }
        let mut inner = self.lock();
        let found = inner.entries.get(&CacheKey::new(page, fingerprint)).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Check for an entry without touching LRU order or counters
    #[must_use]
    pub fn contains(&self, page: PageId, fingerprint: Fingerprint) -> bool {
        self.lock().entries.contains(&CacheKey::new(page, fingerprint))
    }

    /// Store an image. Images larger than the whole budget are not kept.
    /// Returns whether the image was stored.
    pub fn put(&self, page: PageId, fingerprint: Fingerprint, buffer: Arc<ImageBuffer>) -> bool {
        let size = buffer.size();
        let key = CacheKey::new(page, fingerprint);
        let mut inner = self.lock();
        // Checked under the lock so a put cannot land after set_enabled(false).
        if !self.is_enabled() {
            return false;
        }

        if let Some(old) = inner.entries.pop(&key) {
            inner.total_bytes -= old.size();
        }
        if size > inner.limit_bytes {
            debug!(
                "Not caching {page} [{fingerprint}]: {size} bytes exceeds limit {}",
                inner.limit_bytes
            );
            return false;
        }

        let budget = inner.limit_bytes - size;
        inner.evict_to(budget);
        inner.entries.put(key, buffer);
        inner.total_bytes += size;
        true
    }

    /// Drop every cached rendering of `page`. Returns how many were removed.
    pub fn invalidate(&self, page: PageId) -> usize {
        let mut inner = self.lock();
        let keys: Vec<_> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.page == page)
            .map(|(k, _)| *k)
            .collect();

        for key in &keys {
            if let Some(buffer) = inner.entries.pop(key) {
                inner.total_bytes -= buffer.size();
            }
        }
        if !keys.is_empty() {
            debug!("Invalidated {} cached image(s) of {page}", keys.len());
        }
        keys.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Change the size limit, evicting down to it immediately.
    pub fn set_size_limit_mb(&self, megabytes: usize) {
        self.set_size_limit_bytes(megabytes.saturating_mul(BYTES_PER_MB));
    }

    pub fn set_size_limit_bytes(&self, limit_bytes: usize) {
        let mut inner = self.lock();
        inner.limit_bytes = limit_bytes;
        inner.evict_to(limit_bytes);
    }

    /// Size limit in whole megabytes
    #[must_use]
    pub fn size_limit_mb(&self) -> usize {
        self.lock().limit_bytes / BYTES_PER_MB
    }

    /// Turn caching on or off. Disabling also drops every entry.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.lock();
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            inner.clear();
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.total_bytes,
            limit_bytes: inner.limit_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::buffer::PixelFormat;
    use super::super::request::RenderOptions;
    use super::*;

    fn fp(dpi: f32) -> Fingerprint {
        RenderOptions::builder()
            .dpi(dpi)
            .build()
            .expect("valid dpi")
            .fingerprint()
    }

    /// Gray8 image of exactly `bytes` bytes
    fn image(bytes: u32) -> Arc<ImageBuffer> {
        Arc::new(ImageBuffer::new(bytes, 1, PixelFormat::Gray8))
    }

    #[test]
    fn cache_insert_and_get() {
        let cache = RenderCache::with_limit_bytes(1000);
        assert!(cache.put(PageId(0), fp(72.0), image(100)));

        assert!(cache.contains(PageId(0), fp(72.0)));
        assert!(cache.get(PageId(0), fp(72.0)).is_some());
        assert!(cache.get(PageId(0), fp(96.0)).is_none());
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.bytes), (1, 1, 100));
    }

    #[test]
    fn cache_lru_eviction_respects_byte_limit() {
        let cache = RenderCache::with_limit_bytes(250);
        for i in 0..3 {
            cache.put(PageId(i), fp(72.0), image(100));
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.stats().bytes <= 250);
        assert!(!cache.contains(PageId(0), fp(72.0)));
        assert!(cache.contains(PageId(1), fp(72.0)));
        assert!(cache.contains(PageId(2), fp(72.0)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_entry() {
        let cache = RenderCache::with_limit_bytes(200);
        cache.put(PageId(0), fp(72.0), image(100));
        cache.put(PageId(1), fp(72.0), image(100));
        let _ = cache.get(PageId(0), fp(72.0));
        cache.put(PageId(2), fp(72.0), image(100));

        assert!(cache.contains(PageId(0), fp(72.0)));
        assert!(!cache.contains(PageId(1), fp(72.0)));
    }

    #[test]
    fn oversized_image_is_not_cached() {
        let cache = RenderCache::with_limit_bytes(50);
        cache.put(PageId(0), fp(72.0), image(40));
        assert!(!cache.put(PageId(1), fp(72.0), image(60)));
        assert!(cache.contains(PageId(0), fp(72.0)));
        assert_eq!(cache.stats().bytes, 40);
    }

    #[test]
    fn replacing_a_key_does_not_double_count() {
        let cache = RenderCache::with_limit_bytes(1000);
        cache.put(PageId(0), fp(72.0), image(100));
        cache.put(PageId(0), fp(72.0), image(300));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().bytes, 300);
    }

    #[test]
    fn cache_invalidate_page() {
        let cache = RenderCache::with_limit_bytes(10_000);
        cache.put(PageId(0), fp(72.0), image(10));
        cache.put(PageId(0), fp(96.0), image(10));
        cache.put(PageId(1), fp(72.0), image(10));

        assert_eq!(cache.invalidate(PageId(0)), 2);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains(PageId(1), fp(72.0)));
        assert_eq!(cache.stats().bytes, 10);
    }

    #[test]
    fn shrinking_limit_evicts() {
        let cache = RenderCache::with_size_mb(1);
        for i in 0..4 {
            cache.put(PageId(i), fp(72.0), image(300_000));
        }
        assert_eq!(cache.len(), 3);
        cache.set_size_limit_bytes(600_000);
        assert_eq!(cache.len(), 2);
        cache.set_size_limit_mb(0);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = RenderCache::with_limit_bytes(1000);
        cache.put(PageId(0), fp(72.0), image(10));
        cache.set_enabled(false);
        assert!(cache.is_empty());
        assert!(!cache.put(PageId(0), fp(72.0), image(10)));
        assert!(cache.get(PageId(0), fp(72.0)).is_none());

        cache.set_enabled(true);
        assert!(cache.put(PageId(0), fp(72.0), image(10)));
    }

    #[test]
    fn disabling_while_writers_run_leaves_nothing_behind() {
        let cache = Arc::new(RenderCache::with_limit_bytes(1_000_000));
        let stop = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut i = 0usize;
                    while !stop.load(Ordering::SeqCst) {
                        cache.put(PageId(t * 1000 + i % 100), fp(72.0), image(10));
                        i += 1;
                    }
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(10));
        cache.set_enabled(false);
        for _ in 0..1000 {
            assert!(cache.is_empty());
        }
        stop.store(true, Ordering::SeqCst);
        for w in writers {
            w.join().expect("writer thread");
        }

        cache.set_enabled(true);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn evicted_image_stays_valid_for_holder() {
        let cache = RenderCache::with_limit_bytes(100);
        cache.put(PageId(0), fp(72.0), image(100));
        let held = cache.get(PageId(0), fp(72.0)).expect("cached");
        cache.clear();
        assert_eq!(held.size(), 100);
    }

    #[test]
    fn concurrent_access_stays_within_bound() {
        let cache = Arc::new(RenderCache::with_limit_bytes(5_000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200usize {
                        let page = PageId(i % 17);
                        cache.put(page, fp(72.0 + t as f32), image(100 + (i % 7) as u32 * 50));
                        let _ = cache.get(page, fp(72.0));
                        if i % 13 == 0 {
                            cache.invalidate(PageId(i % 5));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker thread");
        }
        let stats = cache.stats();
        assert!(stats.bytes <= stats.limit_bytes);
        cache.invalidate(PageId(3));
        assert!((0..8).all(|t| !cache.contains(PageId(3), fp(72.0 + t as f32))));
    }
}
