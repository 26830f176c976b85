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

use std::{any::Any, sync::Arc};

use hashbrown::HashMap;
use parking_lot::RwLock;
use shoal_common::code::{IndexKey, Value};

/// Multimap from a derived key to the live items sharing it.
///
/// Posting lists hold item clones; membership is by item equality. Updates
/// arrive from the shard write sections of up to four shards at once, so
/// the table carries its own lock.
pub struct SecondaryIndex<T, Q>
where
    T: Value,
    Q: IndexKey,
{
    key_of: Arc<dyn Fn(&T) -> Q + Send + Sync>,
    postings: RwLock<HashMap<Q, Vec<T>>>,
}

impl<T, Q> SecondaryIndex<T, Q>
where
    T: Value,
    Q: IndexKey,
{
    pub fn new(key_of: Arc<dyn Fn(&T) -> Q + Send + Sync>) -> Self {
        Self {
            key_of,
            postings: RwLock::new(HashMap::new()),
        }
    }

    /// Items currently posted under `key`, in no particular order.
    pub fn get(&self, key: &Q) -> Vec<T> {
        self.postings.read().get(key).cloned().unwrap_or_default()
    }

    /// Whether `item` derives `key`.
    pub fn matches(&self, item: &T, key: &Q) -> bool {
        (self.key_of)(item) == *key
    }

    pub fn len(&self) -> usize {
        self.postings.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.read().is_empty()
    }
}

/// Maintenance interface the containers drive from their shard write
/// sections. The concrete key type is erased so indices of different key
/// types can share one registry.
pub trait ItemIndex<T>: Send + Sync
where
    T: Value,
{
    fn insert(&self, item: &T);
    fn remove(&self, item: &T);
    fn replace(&self, old: &T, new: &T);
    fn clear(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T, Q> ItemIndex<T> for SecondaryIndex<T, Q>
where
    T: Value,
    Q: IndexKey,
{
    fn insert(&self, item: &T) {
        let key = (self.key_of)(item);
        self.postings.write().entry(key).or_default().push(item.clone());
    }

    fn remove(&self, item: &T) {
        let key = (self.key_of)(item);
        let mut postings = self.postings.write();
        if let Some(items) = postings.get_mut(&key) {
            if let Some(at) = items.iter().position(|posted| posted == item) {
                items.swap_remove(at);
            }
            if items.is_empty() {
                postings.remove(&key);
            }
        }
    }

    fn replace(&self, old: &T, new: &T) {
        self.remove(old);
        self.insert(new);
    }

    fn clear(&self) {
        self.postings.write().clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_parity() -> SecondaryIndex<u64, bool> {
        SecondaryIndex::new(Arc::new(|item: &u64| item % 2 == 0))
    }

    #[test]
    fn test_postings_follow_membership() {
        let index = by_parity();
        for item in 0..10u64 {
            ItemIndex::insert(&index, &item);
        }

        let mut evens = index.get(&true);
        evens.sort_unstable();
        assert_eq!(evens, vec![0, 2, 4, 6, 8]);
        assert!(index.matches(&4, &true));
        assert!(!index.matches(&5, &true));

        ItemIndex::remove(&index, &4);
        assert_eq!(index.get(&true).len(), 4);

        ItemIndex::replace(&index, &3, &12);
        let mut evens = index.get(&true);
        evens.sort_unstable();
        assert_eq!(evens, vec![0, 2, 6, 8, 12]);

        ItemIndex::clear(&index);
        assert!(index.get(&true).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_key_yields_empty() {
        let index: SecondaryIndex<u64, String> = SecondaryIndex::new(Arc::new(|item: &u64| item.to_string()));
        assert!(index.get(&"nope".to_string()).is_empty());
    }

    #[test]
    fn test_empty_posting_list_is_purged() {
        let index = by_parity();
        ItemIndex::insert(&index, &2);
        ItemIndex::remove(&index, &2);
        assert!(index.is_empty());
    }
}
