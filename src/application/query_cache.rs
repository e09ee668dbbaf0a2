// Bounded LRU cache for time-series query results
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Least-recently-used cache keyed by serialized query.
///
/// Values are shared as `Arc` so cache hits never clone result rows.
#[derive(Debug)]
pub struct QueryCache<V> {
    map: HashMap<String, Arc<V>>,
    order: VecDeque<String>,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl<V> QueryCache<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a value and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<V>> {
        match self.map.get(key).cloned() {
            Some(value) => {
                self.hits += 1;
                self.touch(key);
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn insert(&mut self, key: String, value: Arc<V>) {
        if self.map.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }

        while self.map.len() >= self.max_size && !self.order.is_empty() {
            if let Some(old_key) = self.order.pop_front() {
                self.map.remove(&old_key);
                tracing::debug!("Query cache evicted: {}", old_key);
            }
        }

        self.map.insert(key.clone(), value);
        self.order.push_back(key);
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}
