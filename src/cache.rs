//! Caching layer for recently read blocks.
//!
//! Reads go through a shared lock and never promote entries, so lookups from
//! many readers do not contend on the LRU order. Writers to the chain
//! invalidate every hash they touch after their commit.
use crate::blockchain::Block;
use crate::crypto::Sha256Hash;
use lru::LruCache;
use parking_lot::RwLock;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Storage behind a [`ThreadSafeCache`].
pub trait CacheInner<K, V> {
    /// Look up without touching recency.
    fn get_non_mut(&self, key: &K) -> Option<&V>;

    fn put(&mut self, key: K, value: V);

    fn remove(&mut self, key: &K) -> Option<V>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> CacheInner<K, V> for LruCache<K, V>
where
    K: Hash + Eq,
{
    fn get_non_mut(&self, key: &K) -> Option<&V> {
        self.peek(key)
    }

    fn put(&mut self, key: K, value: V) {
        LruCache::put(self, key, value);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.pop(key)
    }

    fn clear(&mut self) {
        LruCache::clear(self);
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }
}

pub struct ThreadSafeCache<K, V, T: CacheInner<K, V>> {
    cache: Arc<RwLock<T>>,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> ThreadSafeCache<K, V, LruCache<K, V>>
where
    K: Hash + Eq,
    V: Clone,
{
    /// A capacity of zero is treated as one.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            _phantom: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.read().cap().get()
    }
}

impl<K, V, T: CacheInner<K, V>> ThreadSafeCache<K, V, T>
where
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.read().get_non_mut(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.write().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.cache.write().remove(key)
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl<K, V, T: CacheInner<K, V>> Clone for ThreadSafeCache<K, V, T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            _phantom: PhantomData,
        }
    }
}

/// Cache for blocks by hash
pub type BlockCache = ThreadSafeCache<Sha256Hash, Block, LruCache<Sha256Hash, Block>>;

impl BlockCache {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }

    /// Drop `hash` so the next read goes to the repository.
    pub fn invalidate(&self, hash: &Sha256Hash) {
        self.remove(hash);
    }

    /// `(entries, capacity)`
    pub fn stats(&self) -> (usize, usize) {
        (self.len(), self.capacity())
    }
}
