//! Recently-opened blob cache
//!
//! A small bounded LRU of source blobs that sits *above* the renderers to
//! avoid redundant disk reads across tab switches. It is owned by the
//! caller and passed into the factory at construction, never a
//! module-level singleton.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Default number of recently opened source blobs kept in memory.
pub const DEFAULT_BLOB_CAPACITY: usize = 5;

/// Bounded LRU cache of recently opened source blobs, keyed by book id.
#[derive(Clone)]
pub struct BlobCache {
    inner: Arc<Mutex<LruCache<String, Arc<Vec<u8>>>>>,
}

impl BlobCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_BLOB_CAPACITY).unwrap());
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Fetch a blob, refreshing its recency.
    pub fn get(&self, book_id: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().get(book_id).cloned()
    }

    /// Insert a blob, evicting the least recently used entry when full.
    pub fn put(&self, book_id: impl Into<String>, blob: Vec<u8>) -> Arc<Vec<u8>> {
        let blob = Arc::new(blob);
        self.inner.lock().put(book_id.into(), blob.clone());
        blob
    }

    /// Fetch or load through the provided reader.
    pub fn get_or_insert_with<E>(
        &self,
        book_id: &str,
        load: impl FnOnce() -> Result<Vec<u8>, E>,
    ) -> Result<Arc<Vec<u8>>, E> {
        if let Some(blob) = self.get(book_id) {
            return Ok(blob);
        }
        Ok(self.put(book_id, load()?))
    }

    pub fn remove(&self, book_id: &str) {
        self.inner.lock().pop(book_id);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = BlobCache::new(2);
        cache.put("a", vec![1]);
        cache.put("b", vec![2]);
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c", vec![3]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_or_insert_loads_once() {
        let cache = BlobCache::default();
        let mut loads = 0;
        for _ in 0..3 {
            let blob = cache
                .get_or_insert_with("book", || -> Result<_, std::io::Error> {
                    loads += 1;
                    Ok(vec![7, 7, 7])
                })
                .unwrap();
            assert_eq!(blob.as_slice(), &[7, 7, 7]);
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let cache = BlobCache::new(0);
        cache.put("a", vec![1]);
        assert!(cache.get("a").is_some());
    }
}
