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

use shoal_common::{code::Value, pool::ArrayPool};

/// Minimum pooled capacity of a shard list.
pub const MIN_CAPACITY: usize = 16;

/// Single-threaded dynamic array over a pooled backing store.
///
/// Growth doubles through the pool's power-of-two classes; the outgrown
/// array is returned for reuse. A sharded container wraps one of these per
/// shard behind a lock.
pub struct ShardList<T>
where
    T: Value,
{
    items: Vec<T>,
    pool: Arc<ArrayPool<T>>,
}

impl<T> ShardList<T>
where
    T: Value,
{
    pub fn new(pool: Arc<ArrayPool<T>>, capacity: usize) -> Self {
        let items = pool.acquire(capacity.max(MIN_CAPACITY));
        Self { items, pool }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Swap in a larger pooled array when `additional` items cannot fit.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.items.len() + additional;
        if needed <= self.items.capacity() {
            return;
        }
        let mut grown = self.pool.acquire(needed.max(self.items.capacity() * 2));
        grown.extend(self.items.drain(..));
        let outgrown = std::mem::replace(&mut self.items, grown);
        self.pool.release(outgrown);
    }

    pub fn push(&mut self, item: T) {
        self.reserve(1);
        self.items.push(item);
    }

    pub fn extend_from_slice(&mut self, items: &[T]) {
        self.reserve(items.len());
        self.items.extend_from_slice(items);
    }

    /// Remove the first occurrence of `item`, shifting the tail down.
    pub fn remove_item(&mut self, item: &T) -> bool {
        match self.items.iter().position(|present| present == item) {
            Some(at) => {
                self.items.remove(at);
                true
            }
            None => false,
        }
    }

    /// Remove by position, shifting the tail down.
    pub fn remove_at(&mut self, at: usize) -> T {
        self.items.remove(at)
    }

    pub fn get(&self, at: usize) -> Option<&T> {
        self.items.get(at)
    }

    /// Replace in place; returns the previous item.
    pub fn set(&mut self, at: usize, item: T) -> Option<T> {
        let slot = self.items.get_mut(at)?;
        Some(std::mem::replace(slot, item))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn copy_to(&self, target: &mut Vec<T>) {
        target.extend_from_slice(&self.items);
    }
}

impl<T> Drop for ShardList<T>
where
    T: Value,
{
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.items));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> (ShardList<u64>, Arc<ArrayPool<u64>>) {
        let pool = Arc::new(ArrayPool::new());
        (ShardList::new(pool.clone(), 0), pool)
    }

    #[test]
    fn test_push_get_remove() {
        let (mut list, _) = list();
        list.push(1);
        list.push(2);
        list.push(3);

        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1), Some(&2));
        assert!(list.remove_item(&2));
        assert!(!list.remove_item(&2));
        assert_eq!(list.as_slice(), &[1, 3]);

        assert_eq!(list.remove_at(0), 1);
        assert_eq!(list.as_slice(), &[3]);
    }

    #[test]
    fn test_set_in_place() {
        let (mut list, _) = list();
        list.push(5);
        assert_eq!(list.set(0, 6), Some(5));
        assert_eq!(list.set(1, 7), None);
        assert_eq!(list.as_slice(), &[6]);
    }

    #[test]
    fn test_growth_recycles_outgrown_array() {
        let (mut list, pool) = list();
        let before = pool.released();
        for item in 0..100 {
            list.push(item);
        }
        assert!(list.items.capacity() >= 128);
        assert!(pool.released() > before);
        assert_eq!(list.as_slice().len(), 100);

        let mut copied = Vec::new();
        list.copy_to(&mut copied);
        assert_eq!(copied.len(), 100);
    }

    #[test]
    fn test_batch_extend() {
        let (mut list, _) = list();
        list.extend_from_slice(&[1, 2, 3, 4]);
        list.extend_from_slice(&[5, 6]);
        assert_eq!(list.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }
}
