//! Small cache of bind groups keyed on the textures they reference.

use std::collections::VecDeque;
use std::sync::Arc;

/// Keeps the bind groups of the last few textures seen, evicting the oldest.
///
/// Keys are built from [`GpuTexture::id`](super::GpuTexture::id), which is never
/// reused, so a stale entry can waste a slot but never alias a newer texture.
pub struct BindGroupCache<K, V> {
    capacity: usize,
    entries: VecDeque<(K, Arc<V>)>,
}

impl<K: PartialEq, V> BindGroupCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, value)| value.clone())
    }

    /// Stores `value` under `key`, evicting the oldest entry when full.
    pub fn insert(&mut self, key: K, value: V) -> Arc<V> {
        self.entries.retain(|(k, _)| *k != key);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let value = Arc::new(value);
        self.entries.push_back((key, value.clone()));
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get() {
        let mut cache = BindGroupCache::new(2);
        assert!(cache.is_empty());
        assert!(cache.get(&7u64).is_none());
        cache.insert(7u64, "group");
        assert_eq!(cache.get(&7).as_deref(), Some(&"group"));
        cache.insert(7, "rebuilt");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&7).as_deref(), Some(&"rebuilt"));
    }

    #[test]
    fn test_oldest_entry_is_evicted() {
        let mut cache = BindGroupCache::new(2);
        cache.insert(1u64, 'a');
        cache.insert(2u64, 'b');
        cache.insert(3u64, 'c');
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get(&2).as_deref(), Some(&'b'));
        assert_eq!(cache.get(&3).as_deref(), Some(&'c'));
    }
}
