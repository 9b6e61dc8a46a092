//! Fixed-capacity LRU cache in front of durable storage.
//!
//! Eviction never loses data: the authoritative copy is the durable store
//! (or the pending write buffer), so the cache only needs to be bounded.

use std::collections::{BTreeMap, HashMap};

use crate::credentials::types::CredentialRecord;

#[derive(Debug)]
struct Slot {
    record: CredentialRecord,
    tick: u64,
}

/// Least-recently-used cache keyed by credential key.
///
/// Recency is a monotonic tick; `order` maps tick → key so the oldest entry
/// is the first in the tree.
#[derive(Debug)]
pub struct LruCache {
    capacity: usize,
    slots: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
    evictions: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            evictions: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<CredentialRecord> {
        let tick = self.bump();
        let slot = self.slots.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.to_string());
        Some(slot.record.clone())
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn put(&mut self, record: CredentialRecord) {
        let tick = self.bump();
        let key = record.key.clone();

        if let Some(old) = self.slots.insert(key.clone(), Slot { record, tick }) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, key);

        while self.slots.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.slots.remove(&oldest);
            self.evictions += 1;
            tracing::trace!(key = %oldest, "Evicted credential from cache");
        }
    }

    /// Insert only when the key is not cached yet.
    pub fn put_if_absent(&mut self, record: CredentialRecord) {
        if !self.slots.contains_key(&record.key) {
            self.put(record);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CredentialRecord> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.record)
    }

    /// Drop every entry that does not satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&CredentialRecord) -> bool) {
        let order = &mut self.order;
        self.slots.retain(|_, slot| {
            let kept = keep(&slot.record);
            if !kept {
                order.remove(&slot.tick);
            }
            kept
        });
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: u8) -> CredentialRecord {
        CredentialRecord::new(key, vec![value])
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put(record("a", 1));
        cache.put(record("b", 2));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put(record("c", 3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").unwrap().value, vec![1]);
        assert_eq!(cache.get("c").unwrap().value, vec![3]);
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let mut cache = LruCache::new(4);
        cache.put(record("a", 1));
        cache.put(record("a", 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().value, vec![2]);
    }

    #[test]
    fn test_put_if_absent_does_not_overwrite() {
        let mut cache = LruCache::new(4);
        cache.put(record("a", 2));
        cache.put_if_absent(record("a", 1));
        assert_eq!(cache.get("a").unwrap().value, vec![2]);
    }

    #[test]
    fn test_retain_and_bounded_growth() {
        let mut cache = LruCache::new(100);
        for i in 0..250u32 {
            cache.put(record(&format!("pre-key:{i}"), 0));
        }
        cache.put(record("creds", 9));
        assert_eq!(cache.len(), 100);

        cache.retain(|record| record.key == "creds");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("creds").is_some());

        // Order index stays consistent after retain.
        cache.put(record("x", 1));
        assert_eq!(cache.len(), 2);
    }
}
