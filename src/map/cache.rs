//! Bounded layout cache keyed by map signature

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

pub type Layout = HashMap<String, (f64, f64)>;

pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// LRU of computed layouts; owned by a projector, safe to share across tasks
pub struct LayoutCache {
    inner: Mutex<LruCache<String, Layout>>,
}

impl LayoutCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Layout> {
        let mut cache = self.inner.lock().ok()?;
        cache.get(key).cloned()
    }

    pub fn put(&self, key: String, layout: Layout) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, layout);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().map(|cache| cache.contains(key)).unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(x: f64) -> Layout {
        HashMap::from([("u1".to_string(), (x, x))])
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = LayoutCache::new(2);
        cache.put("a".into(), layout(1.0));
        cache.put("b".into(), layout(2.0));
        assert!(cache.get("a").is_some());

        cache.put("c".into(), layout(3.0));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = LayoutCache::default();
        cache.put("a".into(), layout(1.0));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let cache = LayoutCache::new(0);
        cache.put("a".into(), layout(1.0));
        assert_eq!(cache.get("a"), Some(layout(1.0)));
    }
}
