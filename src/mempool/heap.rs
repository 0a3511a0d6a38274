//! Indexed binary min-heap
//!
//! The root is the entry evicted first: lowest priority, and among equal
//! priorities the latest arrival. Every element's slot is tracked in a
//! position map that is updated inside each swap, so removal by key is
//! O(log n) and the index is never stale.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEntry<K> {
    pub key: K,
    pub priority: u64,
    /// Arrival sequence number, unique per heap
    pub seq: u64,
}

impl<K> HeapEntry<K> {
    /// True if `self` must leave the heap before `other`
    fn evicts_before(&self, other: &Self) -> bool {
        self.priority < other.priority || (self.priority == other.priority && self.seq > other.seq)
    }
}

#[derive(Debug)]
pub struct IndexedHeap<K> {
    items: Vec<HeapEntry<K>>,
    positions: HashMap<K, usize>,
}

impl<K> Default for IndexedHeap<K> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> IndexedHeap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&HeapEntry<K>> {
        self.positions.get(key).map(|&i| &self.items[i])
    }

    /// Entries in heap order (unsorted)
    pub fn iter(&self) -> impl Iterator<Item = &HeapEntry<K>> {
        self.items.iter()
    }

    /// Insert; a key already present is left untouched and false is returned
    pub fn push(&mut self, key: K, priority: u64, seq: u64) -> bool {
        if self.positions.contains_key(&key) {
            return false;
        }
        let index = self.items.len();
        self.items.push(HeapEntry { key, priority, seq });
        self.positions.insert(key, index);
        self.sift_up(index);
        true
    }

    /// Entry that would be evicted next
    pub fn peek_min(&self) -> Option<&HeapEntry<K>> {
        self.items.first()
    }

    pub fn pop_min(&mut self) -> Option<HeapEntry<K>> {
        self.remove_at(0)
    }

    pub fn remove(&mut self, key: &K) -> Option<HeapEntry<K>> {
        let index = *self.positions.get(key)?;
        self.remove_at(index)
    }

    fn remove_at(&mut self, index: usize) -> Option<HeapEntry<K>> {
        if index >= self.items.len() {
            return None;
        }
        let last = self.items.len() - 1;
        self.swap(index, last);
        let removed = self.items.pop()?;
        self.positions.remove(&removed.key);

        if index < self.items.len() {
            // The moved element may need to go either way
            self.sift_up(index);
            self.sift_down(index);
        }
        Some(removed)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.items.swap(a, b);
        self.positions.insert(self.items[a].key, a);
        self.positions.insert(self.items[b].key, b);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.items[index].evicts_before(&self.items[parent]) {
                self.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.items[left].evicts_before(&self.items[smallest]) {
                smallest = left;
            }
            if right < len && self.items[right].evicts_before(&self.items[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.items.len(), self.positions.len());
        for (i, entry) in self.items.iter().enumerate() {
            assert_eq!(self.positions[&entry.key], i);
            if i > 0 {
                assert!(!entry.evicts_before(&self.items[(i - 1) / 2]));
            }
        }
    }
}
