//  Copyright 2025 Shoal Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::sync::Arc;

use ahash::RandomState;
use shoal_common::{
    code::{fold_hash, HashBuilder, Item, Value, GOLDEN_RATIO},
    pool::ArrayPool,
    strict_assert,
};

use crate::error::{Error, Result};

/// Minimum bucket count of a shard table.
pub const MIN_BUCKETS: usize = 16;

/// One slot of the entry array.
///
/// `next` encodes three states: `>= 0` links to the next slot of the bucket
/// chain, `-1` ends a chain, and `<= -2` marks a free slot whose value is
/// `-3 - previous_free_head`. Free slots never carry a payload.
struct Slot<K, V> {
    hash: u32,
    next: i32,
    kv: Option<(K, V)>,
}

/// Single-threaded open-addressed hash table with chained buckets, pooled
/// backing arrays and free-list slot reuse.
///
/// Slot indices are stable between resizes, so the bucket array stores
/// 1-based slot indices (`0` means empty) and chains run through `next`.
/// A sharded container wraps one of these per shard behind a lock.
pub struct ShardMap<K, V, S = RandomState>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    /// 1-based slot indices; `0` is an empty bucket. Power-of-two length.
    buckets: Vec<i32>,
    slots: Vec<Slot<K, V>>,
    free_head: i32,
    free_count: usize,
    /// Resize when the slot high-water mark reaches this.
    threshold: usize,
    hash_builder: S,
    bucket_pool: Arc<ArrayPool<i32>>,
    slot_pool: Arc<ArrayPool<Slot<K, V>>>,
}

impl<K, V> ShardMap<K, V>
where
    K: Item,
    V: Value,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(RandomState::default(), capacity)
    }
}

impl<K, V, S> ShardMap<K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    pub fn with_hasher(hash_builder: S, capacity: usize) -> Self {
        let buckets_len = capacity.next_power_of_two().max(MIN_BUCKETS);
        let bucket_pool = Arc::new(ArrayPool::new());
        let slot_pool = Arc::new(ArrayPool::new());
        let mut buckets = bucket_pool.acquire(buckets_len);
        buckets.resize(buckets_len, 0);
        let slots = slot_pool.acquire(buckets_len);
        Self {
            buckets,
            slots,
            free_head: -1,
            free_count: 0,
            threshold: Self::threshold_for(buckets_len),
            hash_builder,
            bucket_pool,
            slot_pool,
        }
    }

    fn threshold_for(buckets: usize) -> usize {
        buckets * 72 / 100
    }

    #[inline(always)]
    fn fold(&self, key: &K) -> u32 {
        fold_hash(self.hash_builder.hash_one(key))
    }

    /// Bucket of a folded hash, spread by the golden ratio.
    #[inline(always)]
    fn bucket_of(&self, hash: u32) -> usize {
        hash.wrapping_mul(GOLDEN_RATIO) as usize & (self.buckets.len() - 1)
    }

    /// Live entries: slot high-water mark minus the free list.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, hash: u32, key: &K) -> Option<usize> {
        let mut at = self.buckets[self.bucket_of(hash)] - 1;
        while at >= 0 {
            let slot = &self.slots[at as usize];
            if slot.hash == hash {
                if let Some((slot_key, _)) = slot.kv.as_ref() {
                    if slot_key == key {
                        return Some(at as usize);
                    }
                }
            }
            at = slot.next;
        }
        None
    }

    fn value_mut(&mut self, at: usize) -> &mut V {
        match self.slots[at].kv.as_mut() {
            Some((_, value)) => value,
            None => unreachable!("free slot reached through a bucket chain"),
        }
    }

    /// Take a slot off the free list, or push past the high-water mark,
    /// resizing first when the mark hits the threshold.
    fn allocate(&mut self, hash: u32, key: K, value: V) -> usize {
        if self.free_head >= 0 {
            let at = self.free_head as usize;
            let slot = &mut self.slots[at];
            strict_assert!(slot.kv.is_none());
            strict_assert!(slot.next <= -2);
            self.free_head = -3 - slot.next;
            self.free_count -= 1;
            slot.hash = hash;
            slot.kv = Some((key, value));
            at
        } else {
            if self.slots.len() >= self.threshold {
                self.grow(self.buckets.len() * 2);
            }
            self.slots.push(Slot {
                hash,
                next: -1,
                kv: Some((key, value)),
            });
            self.slots.len() - 1
        }
    }

    /// Link a slot at the head of its bucket chain.
    fn link(&mut self, at: usize) {
        let bucket = self.bucket_of(self.slots[at].hash);
        self.slots[at].next = self.buckets[bucket] - 1;
        self.buckets[bucket] = at as i32 + 1;
    }

    /// Double into pooled arrays, reinserting live slots in slot order.
    fn grow(&mut self, buckets_len: usize) {
        let mut buckets = self.bucket_pool.acquire(buckets_len);
        buckets.resize(buckets_len, 0);
        let old_buckets = std::mem::replace(&mut self.buckets, buckets);
        self.bucket_pool.release(old_buckets);

        let fresh = self.slot_pool.acquire(buckets_len);
        let mut old_slots = std::mem::replace(&mut self.slots, fresh);
        self.free_head = -1;
        self.free_count = 0;
        self.threshold = Self::threshold_for(buckets_len);

        for slot in old_slots.drain(..) {
            if slot.kv.is_some() {
                let at = self.slots.len();
                self.slots.push(Slot {
                    hash: slot.hash,
                    next: -1,
                    kv: slot.kv,
                });
                self.link(at);
            }
        }
        self.slot_pool.release(old_slots);
    }

    /// Resize so `total` entries fit without another resize.
    pub fn ensure_capacity(&mut self, total: usize) {
        let mut buckets_len = self.buckets.len();
        while Self::threshold_for(buckets_len) < total {
            buckets_len *= 2;
        }
        if buckets_len > self.buckets.len() {
            self.grow(buckets_len);
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(self.fold(key), key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let at = self.find(self.fold(key), key)?;
        self.slots[at].kv.as_ref().map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let at = self.find(self.fold(key), key)?;
        self.slots[at].kv.as_mut().map(|(_, value)| value)
    }

    /// Upsert returning a writable reference to the value slot and whether
    /// the key already existed. A fresh slot starts from `V::default()`.
    pub fn entry_or_default(&mut self, key: K) -> (&mut V, bool)
    where
        V: Default,
    {
        let hash = self.fold(&key);
        if let Some(at) = self.find(hash, &key) {
            return (self.value_mut(at), true);
        }
        let at = self.allocate(hash, key, V::default());
        self.link(at);
        (self.value_mut(at), false)
    }

    /// Add a new key, failing when it is already present.
    pub fn try_add(&mut self, key: K, value: V) -> Result<()> {
        let hash = self.fold(&key);
        if self.find(hash, &key).is_some() {
            return Err(Error::KeyExists);
        }
        let at = self.allocate(hash, key, value);
        self.link(at);
        Ok(())
    }

    /// Upsert; returns the previous value when the key was present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.fold(&key);
        if let Some(at) = self.find(hash, &key) {
            match self.slots[at].kv.as_mut() {
                Some((_, slot_value)) => return Some(std::mem::replace(slot_value, value)),
                None => unreachable!("free slot reached through a bucket chain"),
            }
        }
        let at = self.allocate(hash, key, value);
        self.link(at);
        None
    }

    /// Unlink from the bucket chain and push the slot onto the free list.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.fold(key);
        let bucket = self.bucket_of(hash);
        let mut prev: i32 = -1;
        let mut at = self.buckets[bucket] - 1;
        while at >= 0 {
            let matched = {
                let slot = &self.slots[at as usize];
                slot.hash == hash && matches!(slot.kv.as_ref(), Some((slot_key, _)) if slot_key == key)
            };
            if matched {
                let next = self.slots[at as usize].next;
                if prev < 0 {
                    self.buckets[bucket] = next + 1;
                } else {
                    self.slots[prev as usize].next = next;
                }
                let slot = &mut self.slots[at as usize];
                slot.next = -3 - self.free_head;
                let kv = slot.kv.take();
                self.free_head = at;
                self.free_count += 1;
                return kv.map(|(_, value)| value);
            }
            prev = at;
            at = self.slots[at as usize].next;
        }
        None
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|bucket| *bucket = 0);
        self.slots.clear();
        self.free_head = -1;
        self.free_count = 0;
    }

    /// Live entries in slot order. Free slots (`next < -1`) are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots
            .iter()
            .filter(|slot| slot.next >= -1)
            .filter_map(|slot| slot.kv.as_ref().map(|(key, value)| (key, value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Live entry at a 0-based position in iteration order.
    pub fn at(&self, position: usize) -> Option<(&K, &V)> {
        self.iter().nth(position)
    }

    /// Verify the structural invariants: every live slot reachable from
    /// exactly one bucket chain, every free slot on the free list, and the
    /// two sets disjoint and exhaustive.
    #[cfg(any(test, feature = "strict_assertions"))]
    pub fn check_invariants(&self) {
        use std::collections::HashSet;

        let mut chained = HashSet::new();
        for bucket in self.buckets.iter() {
            let mut at = bucket - 1;
            while at >= 0 {
                assert!(chained.insert(at), "slot {at} reachable from two chains");
                let slot = &self.slots[at as usize];
                assert!(slot.kv.is_some(), "free slot {at} reachable from a chain");
                at = slot.next;
            }
        }

        let mut free = HashSet::new();
        let mut at = self.free_head;
        while at >= 0 {
            assert!(free.insert(at), "slot {at} on the free list twice");
            let slot = &self.slots[at as usize];
            assert!(slot.kv.is_none(), "live slot {at} on the free list");
            assert!(slot.next <= -2, "free slot {at} with chain-state next");
            at = -3 - slot.next;
        }

        assert_eq!(free.len(), self.free_count);
        assert_eq!(chained.len() + free.len(), self.slots.len());
        assert_eq!(self.len(), chained.len());
        assert!(chained.is_disjoint(&free));
    }
}

impl<K, V, S> Drop for ShardMap<K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    fn drop(&mut self) {
        self.bucket_pool.release(std::mem::take(&mut self.buckets));
        self.slot_pool.release(std::mem::take(&mut self.slots));
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut map = ShardMap::<String, u64>::new(16);

        map.try_add("a".to_string(), 1).unwrap();
        map.try_add("b".to_string(), 2).unwrap();
        assert_eq!(map.try_add("a".to_string(), 3), Err(Error::KeyExists));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"a".to_string()), Some(&1));
        assert!(map.contains_key(&"b".to_string()));
        assert_eq!(map.get(&"c".to_string()), None);

        assert_eq!(map.remove(&"a".to_string()), Some(1));
        assert_eq!(map.remove(&"a".to_string()), None);
        assert_eq!(map.len(), 1);
        map.check_invariants();
    }

    #[test]
    fn test_entry_or_default() {
        let mut map = ShardMap::<u64, u64>::new(16);

        let (value, existed) = map.entry_or_default(7);
        assert!(!existed);
        assert_eq!(*value, 0);
        *value = 42;

        let (value, existed) = map.entry_or_default(7);
        assert!(existed);
        assert_eq!(*value, 42);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let mut map = ShardMap::<u64, String>::new(16);
        assert_eq!(map.insert(1, "one".to_string()), None);
        assert_eq!(map.insert(1, "uno".to_string()), Some("one".to_string()));
        assert_eq!(map.get(&1), Some(&"uno".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut map = ShardMap::<u64, u64>::new(16);
        for key in 0..8 {
            map.try_add(key, key).unwrap();
        }
        for key in 0..4 {
            map.remove(&key);
        }
        map.check_invariants();

        // Freed slots are reused before the high-water mark moves.
        let high_water = map.slots.len();
        for key in 100..104 {
            map.try_add(key, key).unwrap();
        }
        assert_eq!(map.slots.len(), high_water);
        assert_eq!(map.len(), 8);
        map.check_invariants();
    }

    #[test]
    fn test_resize_keeps_entries() {
        let mut map = ShardMap::<u64, u64>::new(16);
        for key in 0..10_000 {
            map.try_add(key, key * 3).unwrap();
        }
        assert_eq!(map.len(), 10_000);
        for key in 0..10_000 {
            assert_eq!(map.get(&key), Some(&(key * 3)));
        }
        map.check_invariants();
    }

    #[test]
    fn test_ensure_capacity_avoids_growth() {
        let mut map = ShardMap::<u64, u64>::new(16);
        map.ensure_capacity(1000);
        let buckets = map.buckets.len();
        for key in 0..1000 {
            map.try_add(key, key).unwrap();
        }
        assert_eq!(map.buckets.len(), buckets);
        map.check_invariants();
    }

    #[test]
    fn test_clear() {
        let mut map = ShardMap::<u64, u64>::new(16);
        for key in 0..100 {
            map.try_add(key, key).unwrap();
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
        map.check_invariants();

        map.try_add(1, 1).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_iteration_skips_free_slots() {
        let mut map = ShardMap::<u64, u64>::new(16);
        for key in 0..6 {
            map.try_add(key, key).unwrap();
        }
        map.remove(&2);
        map.remove(&4);

        let mut keys: Vec<_> = map.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 3, 5]);
        assert_eq!(map.values().count(), 4);
        assert_eq!(map.at(0).is_some(), true);
        assert_eq!(map.at(4), None);
    }

    #[test]
    fn test_map_fuzzy() {
        let mut map = ShardMap::<u64, u64>::new(16);
        let mut shadow = std::collections::HashMap::new();
        let mut rng = SmallRng::seed_from_u64(42);

        for _ in 0..100_000 {
            let key = rng.gen_range(0..2048u64);
            if rng.gen_bool(0.6) {
                map.insert(key, key);
                shadow.insert(key, key);
            } else {
                assert_eq!(map.remove(&key), shadow.remove(&key));
            }
        }

        map.check_invariants();
        assert_eq!(map.len(), shadow.len());
        for (key, value) in shadow.iter() {
            assert_eq!(map.get(key), Some(value));
        }
    }
}
