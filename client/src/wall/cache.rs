//! LRU cache of decoded tile images, owned by the loader context

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

/// Decoded tile pixels behind a locally dereferenceable source id
#[derive(Clone)]
pub struct ResourceRef {
    src: Arc<str>,
    image: Arc<RgbaImage>,
}

impl ResourceRef {
    pub fn new(src: impl Into<Arc<str>>, image: RgbaImage) -> Self {
        Self {
            src: src.into(),
            image: Arc::new(image),
        }
    }

    /// Handle string, e.g. `blob:wall/12`
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// RGBA8 = 4 bytes per pixel
    pub fn memory_size(&self) -> usize {
        let (w, h) = self.dimensions();
        w as usize * h as usize * 4
    }

    /// Live references to the pixel data
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.image)
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("src", &self.src)
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

/// LRU cache keyed by tile key string
pub struct ResourceCache {
    entries: HashMap<String, ResourceRef>,
    access_order: VecDeque<String>,
    max_entries: Option<usize>,
    current_memory: usize,
    max_memory: Option<usize>,
}

impl ResourceCache {
    /// Create a new cache
    /// - max_entries: maximum number of resources, `None` for unbounded
    /// - max_memory: maximum decoded bytes, `None` for unbounded
    pub fn new(max_entries: Option<usize>, max_memory: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            access_order: VecDeque::new(),
            max_entries,
            current_memory: 0,
            max_memory,
        }
    }

    /// Unbounded, append-only cache
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get a resource, updating access order
    pub fn get(&mut self, key: &str) -> Option<ResourceRef> {
        let resource = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(resource)
    }

    /// Insert a resource, evicting least recently used entries if needed
    pub fn insert(&mut self, key: String, resource: ResourceRef) {
        if let Some(old) = self.entries.remove(&key) {
            self.current_memory -= old.memory_size();
            self.access_order.retain(|k| k != &key);
        }

        let memory_size = resource.memory_size();
        while self.should_evict(memory_size) {
            if !self.evict_oldest() {
                break;
            }
        }

        self.current_memory += memory_size;
        self.entries.insert(key.clone(), resource);
        self.access_order.push_back(key);
    }

    fn should_evict(&self, new_memory: usize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let over_count = self.max_entries.is_some_and(|max| self.entries.len() >= max);
        let over_memory = self
            .max_memory
            .is_some_and(|max| self.current_memory + new_memory > max);
        over_count || over_memory
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(oldest) = self.access_order.pop_front() else {
            return false;
        };
        if let Some(resource) = self.entries.remove(&oldest) {
            self.current_memory -= resource.memory_size();
            log::debug!("Evicted cached tile {}", oldest);
        }
        true
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            if let Some(k) = self.access_order.remove(pos) {
                self.access_order.push_back(k);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            max_entries: self.max_entries,
            memory_used: self.current_memory,
            max_memory: self.max_memory,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache statistics for logging
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entry_count: usize,
    pub max_entries: Option<usize>,
    pub memory_used: usize,
    pub max_memory: Option<usize>,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f32 {
        match self.max_memory {
            Some(max) if max > 0 => (self.memory_used as f32 / max as f32) * 100.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(n: u32, size: u32) -> ResourceRef {
        ResourceRef::new(format!("blob:wall/{}", n), RgbaImage::new(size, size))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = ResourceCache::new(Some(2), None);
        cache.insert("a".into(), resource(1, 1));
        cache.insert("b".into(), resource(2, 1));
        assert!(cache.get("a").is_some());

        cache.insert("c".into(), resource(3, 1));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_memory_bound() {
        // 4x4 RGBA = 64 bytes each
        let mut cache = ResourceCache::new(None, Some(128));
        cache.insert("a".into(), resource(1, 4));
        cache.insert("b".into(), resource(2, 4));
        cache.insert("c".into(), resource(3, 4));

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.memory_used, 128);
        assert!(!cache.contains("a"));
        assert_eq!(stats.memory_usage_percent(), 100.0);
    }

    #[test]
    fn test_unbounded_is_append_only() {
        let mut cache = ResourceCache::unbounded();
        for i in 0..1000 {
            cache.insert(format!("{},0,0", i), resource(i, 1));
        }
        assert_eq!(cache.len(), 1000);
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let mut cache = ResourceCache::new(Some(4), None);
        cache.insert("a".into(), resource(1, 2));
        cache.insert("a".into(), resource(2, 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().memory_used, 16);
        assert_eq!(cache.get("a").map(|r| r.src().to_string()), Some("blob:wall/2".into()));
    }

    #[test]
    fn test_evicted_resource_stays_alive_for_holders() {
        let mut cache = ResourceCache::new(Some(1), None);
        let held = resource(1, 1);
        cache.insert("a".into(), held.clone());
        assert_eq!(held.ref_count(), 2);
        cache.insert("b".into(), resource(2, 1));
        assert_eq!(held.ref_count(), 1);
    }
}
