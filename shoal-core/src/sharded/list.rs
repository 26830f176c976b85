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

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ahash::RandomState;
use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::{RwLock, RwLockWriteGuard};
use shoal_common::{
    batch::Batch,
    code::{HashBuilder, IndexKey, Item},
    pool::ArrayPool,
};

use super::{shard_of, ShardedOptions, SHARDS};
use crate::{
    bus::{ChangeBus, Subscription},
    error::{Error, Result},
    event::ChangeEvent,
    index::{ItemIndex, SecondaryIndex},
    legacy::{ChangedHandler, Dispatcher},
    metrics::Counters,
    store::ShardList,
};

/// Thread-safe list split across [`SHARDS`] shards, each behind its own
/// readers-writer lock. Mutations surface on the change stream; bulk
/// operations surface as a single batch notification.
///
/// Items are routed to a shard by their hash, so iteration order is
/// "shard 0, then 1, 2, 3" with insertion order inside each shard.
pub struct ShardedList<T, S = RandomState>
where
    T: Item,
    S: HashBuilder,
{
    shards: [RwLock<ShardList<T>>; SHARDS],
    indices: RwLock<HashMap<String, Arc<dyn ItemIndex<T>>>>,
    bus: ChangeBus<T>,
    pool: Arc<ArrayPool<T>>,
    hash_builder: S,
    counters: Arc<Counters>,
    disposed: AtomicBool,
    options: ShardedOptions,
}

/// Builder of a [`ShardedList`].
pub struct ShardedListBuilder<S = RandomState>
where
    S: HashBuilder,
{
    options: ShardedOptions,
    hash_builder: S,
}

impl Default for ShardedListBuilder<RandomState> {
    fn default() -> Self {
        Self {
            options: ShardedOptions::default(),
            hash_builder: RandomState::default(),
        }
    }
}

impl<S> ShardedListBuilder<S>
where
    S: HashBuilder,
{
    pub fn with_shard_capacity(mut self, capacity: usize) -> Self {
        self.options.shard_capacity = capacity;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.options.parallel_threshold = threshold;
        self
    }

    pub fn with_options(mut self, options: ShardedOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hash_builder<S2>(self, hash_builder: S2) -> ShardedListBuilder<S2>
    where
        S2: HashBuilder,
    {
        ShardedListBuilder {
            options: self.options,
            hash_builder,
        }
    }

    pub fn build<T>(self) -> ShardedList<T, S>
    where
        T: Item,
    {
        let pool = Arc::new(ArrayPool::new());
        let counters = Arc::new(Counters::default());
        let shards =
            std::array::from_fn(|_| RwLock::new(ShardList::new(pool.clone(), self.options.shard_capacity)));
        ShardedList {
            shards,
            indices: RwLock::new(HashMap::new()),
            bus: ChangeBus::new(counters.clone()),
            pool,
            hash_builder: self.hash_builder,
            counters,
            disposed: AtomicBool::new(false),
            options: self.options,
        }
    }
}

impl<T> ShardedList<T>
where
    T: Item,
{
    pub fn new() -> Self {
        ShardedListBuilder::default().build()
    }

    pub fn builder() -> ShardedListBuilder<RandomState> {
        ShardedListBuilder::default()
    }
}

impl<T> Default for ShardedList<T>
where
    T: Item,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> ShardedList<T, S>
where
    T: Item,
    S: HashBuilder,
{
    #[inline(always)]
    fn shard_index(&self, item: &T) -> usize {
        shard_of(self.hash_builder.hash_one(item))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &T) -> bool {
        self.shards[self.shard_index(item)].read().as_slice().contains(item)
    }

    pub fn add(&self, item: T) -> Result<()> {
        self.ensure_live()?;
        let shard = self.shard_index(&item);
        let mut store = self.shards[shard].write();
        store.push(item.clone());
        self.insert_into_indices(&item);
        self.counters.insert.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::Added(item));
        Ok(())
    }

    /// Remove the first occurrence of `item` from its shard.
    pub fn remove(&self, item: &T) -> Result<bool> {
        self.ensure_live()?;
        let shard = self.shard_index(item);
        let mut store = self.shards[shard].write();
        if !store.remove_item(item) {
            return Ok(false);
        }
        self.remove_from_indices(item);
        self.counters.remove.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::Removed(item.clone()));
        Ok(true)
    }

    /// Item at a global 0-based index, mapping through cumulative shard
    /// counts. Linear in shards, not in items.
    pub fn get(&self, index: usize) -> Result<T> {
        let mut remaining = index;
        for shard in self.shards.iter() {
            let store = shard.read();
            if let Some(item) = store.get(remaining) {
                return Ok(item.clone());
            }
            remaining -= store.len();
        }
        Err(Error::OutOfRange {
            index,
            len: index - remaining,
        })
    }

    /// A sharded list has no stable global ordering to write through.
    pub fn set(&self, _index: usize, _item: T) -> Result<()> {
        Err(Error::Unsupported("set by global index on a sharded list"))
    }

    /// Snapshot of all items, shard 0 first. Shard locks are taken in
    /// ascending order and released in descending order.
    pub fn to_vec(&self) -> Vec<T> {
        let mut guards = self.shards.iter().map(|shard| shard.read()).collect_vec();
        let mut items = Vec::with_capacity(guards.iter().map(|guard| guard.len()).sum());
        for guard in guards.iter() {
            items.extend_from_slice(guard.as_slice());
        }
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        items
    }

    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }

    pub fn copy_to(&self, target: &mut Vec<T>) {
        target.extend(self.to_vec());
    }

    /// Bucketize `items` by shard into pooled arrays.
    fn bucketize(&self, items: &[T]) -> [Vec<T>; SHARDS] {
        let mut buckets: [Vec<T>; SHARDS] =
            std::array::from_fn(|_| self.pool.acquire(items.len() / SHARDS + 1));
        for item in items {
            buckets[self.shard_index(item)].push(item.clone());
        }
        buckets
    }

    fn apply_added(&self, shard: &RwLock<ShardList<T>>, bucket: &[T]) {
        let mut store = shard.write();
        store.extend_from_slice(bucket);
        for item in bucket {
            self.insert_into_indices(item);
        }
        self.counters.insert.fetch_add(bucket.len(), Ordering::Relaxed);
    }

    fn apply_removed(&self, shard: &RwLock<ShardList<T>>, bucket: &[T]) -> usize {
        let mut store = shard.write();
        let mut removed = 0;
        for item in bucket {
            if store.remove_item(item) {
                self.remove_from_indices(item);
                removed += 1;
            }
        }
        removed
    }

    /// Add every item, one shard write per non-empty bucket, then emit a
    /// single `BatchAdded` carrying a pooled copy of the input.
    pub fn add_range(&self, items: &[T]) -> Result<()> {
        self.ensure_live()?;
        if items.is_empty() {
            return Ok(());
        }

        let buckets = self.bucketize(items);
        if items.len() >= self.options.parallel_threshold {
            tracing::trace!("[sharded]: parallel add of {} items", items.len());
            std::thread::scope(|scope| {
                for (shard, bucket) in self.shards.iter().zip(buckets.iter()) {
                    if bucket.is_empty() {
                        continue;
                    }
                    scope.spawn(move || self.apply_added(shard, bucket));
                }
            });
        } else {
            for (shard, bucket) in self.shards.iter().zip(buckets.iter()) {
                if bucket.is_empty() {
                    continue;
                }
                self.apply_added(shard, bucket);
            }
        }
        for bucket in buckets {
            self.pool.release(bucket);
        }

        let mut copy = self.pool.acquire(items.len());
        copy.extend_from_slice(items);
        self.bus.emit(ChangeEvent::BatchAdded(Batch::leased(copy, self.pool.clone())));
        Ok(())
    }

    /// Remove every present item, then emit a single `BatchRemoved`
    /// carrying a pooled copy of the input.
    pub fn remove_range(&self, items: &[T]) -> Result<()> {
        self.ensure_live()?;
        if items.is_empty() {
            return Ok(());
        }

        let buckets = self.bucketize(items);
        let removed = if items.len() >= self.options.parallel_threshold {
            tracing::trace!("[sharded]: parallel remove of {} items", items.len());
            std::thread::scope(|scope| {
                let handles = self
                    .shards
                    .iter()
                    .zip(buckets.iter())
                    .filter(|(_, bucket)| !bucket.is_empty())
                    .map(|(shard, bucket)| scope.spawn(move || self.apply_removed(shard, bucket)))
                    .collect_vec();
                handles
                    .into_iter()
                    .map(|handle| match handle.join() {
                        Ok(count) => count,
                        Err(panic) => std::panic::resume_unwind(panic),
                    })
                    .sum::<usize>()
            })
        } else {
            self.shards
                .iter()
                .zip(buckets.iter())
                .map(|(shard, bucket)| {
                    if bucket.is_empty() {
                        0
                    } else {
                        self.apply_removed(shard, bucket)
                    }
                })
                .sum()
        };
        for bucket in buckets {
            self.pool.release(bucket);
        }
        self.counters.remove.fetch_add(removed, Ordering::Relaxed);

        let mut copy = self.pool.acquire(items.len());
        copy.extend_from_slice(items);
        self.bus
            .emit(ChangeEvent::BatchRemoved(Batch::leased(copy, self.pool.clone())));
        Ok(())
    }

    /// Remove every item matching `predicate`; emits one `BatchOp` when
    /// anything was removed. Returns the removed count.
    pub fn remove_many<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&T) -> bool,
    {
        self.ensure_live()?;
        let mut removed = self.pool.acquire(16);
        for shard in self.shards.iter() {
            let mut store = shard.write();
            let start = removed.len();
            for item in store.as_slice() {
                if predicate(item) {
                    removed.push(item.clone());
                }
            }
            for item in &removed[start..] {
                store.remove_item(item);
                self.remove_from_indices(item);
            }
        }
        let count = removed.len();
        if count == 0 {
            self.pool.release(removed);
            return Ok(0);
        }
        self.counters.remove.fetch_add(count, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::BatchOp(Batch::leased(removed, self.pool.clone())));
        Ok(count)
    }

    /// Run `action` against an unlocked, notification-suppressed façade
    /// while all four shard write locks are held (acquired ascending,
    /// released descending). A single `BatchOp` carrying the net added
    /// items is emitted after the locks are released.
    ///
    /// `action` must not call back into this container; the shard locks are
    /// not reentrant.
    pub fn edit<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&mut ListEditor<'_, T, S>),
    {
        self.ensure_live()?;
        let stores = self.shards.iter().map(|shard| shard.write()).collect_vec();
        let mut editor = ListEditor {
            owner: self,
            stores,
            added: Vec::new(),
        };
        action(&mut editor);
        let ListEditor {
            stores: mut guards,
            added,
            ..
        } = editor;
        while let Some(guard) = guards.pop() {
            drop(guard);
        }

        let mut batch = self.pool.acquire(added.len());
        batch.extend(added);
        self.bus.emit(ChangeEvent::BatchOp(Batch::leased(batch, self.pool.clone())));
        Ok(())
    }

    /// Clear every shard and index under the all-shard write lock; emits a
    /// single `Cleared`.
    pub fn clear(&self) -> Result<()> {
        self.ensure_live()?;
        let mut guards = self.shards.iter().map(|shard| shard.write()).collect_vec();
        for store in guards.iter_mut() {
            store.clear();
        }
        self.clear_indices();
        self.counters.clear.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::Cleared);
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        Ok(())
    }

    /// Register a secondary index under `name`, populated from the current
    /// items. Registering an existing name overwrites it.
    pub fn add_index<Q, F>(&self, name: impl Into<String>, key_of: F)
    where
        Q: IndexKey,
        F: Fn(&T) -> Q + Send + Sync + 'static,
    {
        let index: Arc<dyn ItemIndex<T>> = Arc::new(SecondaryIndex::new(Arc::new(key_of)));
        let name = name.into();
        tracing::debug!("[sharded]: building index {name:?}");
        let mut guards = self.shards.iter().map(|shard| shard.read()).collect_vec();
        for guard in guards.iter() {
            for item in guard.as_slice() {
                index.insert(item);
            }
        }
        self.indices.write().insert(name, index);
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
    }

    fn with_typed_index<Q, R>(&self, name: &str, f: impl FnOnce(&SecondaryIndex<T, Q>) -> R) -> Option<R>
    where
        Q: IndexKey,
    {
        let indices = self.indices.read();
        let index = indices.get(name)?;
        let typed = index.as_any().downcast_ref::<SecondaryIndex<T, Q>>()?;
        Some(f(typed))
    }

    /// Posting list of `key` under the named index; empty when the index
    /// does not exist or its key type does not match.
    pub fn items_by_index<Q>(&self, name: &str, key: &Q) -> Vec<T>
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<T, Q>| index.get(key))
            .unwrap_or_default()
    }

    /// As [`Self::items_by_index`], but an unknown name or mismatched key
    /// type is an error.
    pub fn items_by_index_checked<Q>(&self, name: &str, key: &Q) -> Result<Vec<T>>
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<T, Q>| index.get(key))
            .ok_or_else(|| Error::InvalidIndex(name.to_string()))
    }

    /// Whether `item` derives `key` under the named index.
    pub fn item_matches_index<Q>(&self, name: &str, item: &T, key: &Q) -> bool
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<T, Q>| index.matches(item, key))
            .unwrap_or(false)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indices.read().keys().cloned().collect()
    }

    fn insert_into_indices(&self, item: &T) {
        for index in self.indices.read().values() {
            index.insert(item);
        }
    }

    fn remove_from_indices(&self, item: &T) {
        for index in self.indices.read().values() {
            index.remove(item);
        }
    }

    fn clear_indices(&self) {
        for index in self.indices.read().values() {
            index.clear();
        }
    }

    /// Notification stream; events arrive in drainer order.
    pub fn subscribe(&self) -> Subscription<T> {
        self.bus.subscribe()
    }

    /// Register the legacy collection-changed sink. Events are marshalled
    /// through `dispatcher` when one is supplied, else invoked inline on
    /// the drainer thread.
    pub fn on_collection_changed(&self, handler: ChangedHandler, dispatcher: Option<Dispatcher>) {
        self.bus.set_legacy(handler, dispatcher);
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn pool(&self) -> &ArrayPool<T> {
        &self.pool
    }

    /// Stop the drainer and complete subscriber streams. Mutations after
    /// this fail with [`Error::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("[sharded]: dispose list");
        self.bus.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Unlocked façade over all four shards, handed to [`ShardedList::edit`].
/// Mutations through the editor raise no notifications.
pub struct ListEditor<'a, T, S>
where
    T: Item,
    S: HashBuilder,
{
    owner: &'a ShardedList<T, S>,
    stores: Vec<RwLockWriteGuard<'a, ShardList<T>>>,
    added: Vec<T>,
}

impl<T, S> ListEditor<'_, T, S>
where
    T: Item,
    S: HashBuilder,
{
    pub fn add(&mut self, item: T) {
        let shard = self.owner.shard_index(&item);
        self.stores[shard].push(item.clone());
        self.owner.insert_into_indices(&item);
        self.added.push(item);
    }

    pub fn remove(&mut self, item: &T) -> bool {
        let shard = self.owner.shard_index(item);
        if self.stores[shard].remove_item(item) {
            self.owner.remove_from_indices(item);
            if let Some(at) = self.added.iter().position(|added| added == item) {
                self.added.swap_remove(at);
            }
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        for store in self.stores.iter_mut() {
            store.clear();
        }
        self.owner.clear_indices();
        self.added.clear();
    }

    pub fn len(&self) -> usize {
        self.stores.iter().map(|store| store.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &T) -> bool {
        self.stores[self.owner.shard_index(item)].as_slice().contains(item)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::ChangeAction;

    const RECV: Duration = Duration::from_secs(1);

    #[test]
    fn test_add_remove_contains() {
        let list = ShardedList::<u64>::new();
        for item in 0..100 {
            list.add(item).unwrap();
        }
        assert_eq!(list.len(), 100);
        assert!(list.contains(&42));
        assert!(list.remove(&42).unwrap());
        assert!(!list.remove(&42).unwrap());
        assert!(!list.contains(&42));
        assert_eq!(list.len(), 99);
    }

    #[test]
    fn test_global_index() {
        let list = ShardedList::<u64>::new();
        for item in 0..50 {
            list.add(item).unwrap();
        }
        let snapshot = list.to_vec();
        for (at, item) in snapshot.iter().enumerate() {
            assert_eq!(list.get(at).unwrap(), *item);
        }
        assert_eq!(list.get(50), Err(Error::OutOfRange { index: 50, len: 50 }));
        assert_eq!(
            list.set(0, 1),
            Err(Error::Unsupported("set by global index on a sharded list"))
        );
    }

    #[test]
    fn test_single_shard_notification_order() {
        let list = ShardedList::<u64>::new();
        let stream = list.subscribe();

        // Mutations of one item land on one shard, whose write lock
        // serializes the emits.
        list.add(7).unwrap();
        list.remove(&7).unwrap();
        list.add(7).unwrap();

        let actions: Vec<_> = (0..3)
            .map(|_| stream.recv_timeout(RECV).unwrap().action())
            .collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Added, ChangeAction::Removed, ChangeAction::Added]
        );
    }

    #[test]
    fn test_add_range_emits_single_batch() {
        let list = ShardedList::<u64>::new();
        let stream = list.subscribe();
        let items = (0..500).collect_vec();

        list.add_range(&items).unwrap();
        assert_eq!(list.len(), 500);

        let event = stream.recv_timeout(RECV).unwrap();
        assert_eq!(event.action(), ChangeAction::BatchAdded);
        let batch = event.batch().unwrap();
        assert_eq!(batch.len(), 500);
        let mut payload = batch.items().to_vec();
        payload.sort_unstable();
        assert_eq!(payload, items);

        assert!(stream.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_parallel_batch_path() {
        let list = ShardedList::<u64>::builder().with_parallel_threshold(64).build();
        let items = (0..1024).collect_vec();
        list.add_range(&items).unwrap();
        assert_eq!(list.len(), 1024);

        list.remove_range(&items).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_remove_many() {
        let list = ShardedList::<u64>::new();
        let stream = list.subscribe();
        list.add_range(&(0..100).collect_vec()).unwrap();
        let _ = stream.recv_timeout(RECV).unwrap();

        let removed = list.remove_many(|item| item % 2 == 0).unwrap();
        assert_eq!(removed, 50);
        assert_eq!(list.len(), 50);

        let event = stream.recv_timeout(RECV).unwrap();
        assert_eq!(event.action(), ChangeAction::BatchOp);
        assert_eq!(event.batch().unwrap().len(), 50);

        // Nothing left to remove, nothing emitted.
        assert_eq!(list.remove_many(|item| item % 2 == 0).unwrap(), 0);
        assert!(stream.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_edit_emits_single_batch_op() {
        let list = ShardedList::<u64>::new();
        let stream = list.subscribe();

        list.edit(|editor| {
            editor.add(1);
            editor.add(2);
            editor.add(3);
            assert_eq!(editor.len(), 3);
            assert!(editor.contains(&2));
            assert!(editor.remove(&2));
        })
        .unwrap();

        assert_eq!(list.len(), 2);
        let event = stream.recv_timeout(RECV).unwrap();
        assert_eq!(event.action(), ChangeAction::BatchOp);
        let mut net = event.batch().unwrap().items().to_vec();
        net.sort_unstable();
        assert_eq!(net, vec![1, 3]);
        assert!(stream.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_clear_emits_cleared() {
        let list = ShardedList::<u64>::new();
        let stream = list.subscribe();
        list.add_range(&(0..10).collect_vec()).unwrap();
        let _ = stream.recv_timeout(RECV).unwrap();

        list.clear().unwrap();
        assert!(list.is_empty());
        assert_eq!(stream.recv_timeout(RECV).unwrap().action(), ChangeAction::Cleared);
    }

    #[test]
    fn test_secondary_index() {
        let list = ShardedList::<u64>::new();
        list.add_range(&(0..100).collect_vec()).unwrap();

        list.add_index("parity", |item: &u64| item % 2);
        assert_eq!(list.index_names(), vec!["parity".to_string()]);

        let evens = list.items_by_index("parity", &0u64);
        assert_eq!(evens.len(), 50);
        assert!(list.item_matches_index("parity", &4u64, &0u64));
        assert!(!list.item_matches_index("parity", &5u64, &0u64));

        // Maintained on later mutations.
        list.add(200).unwrap();
        assert_eq!(list.items_by_index("parity", &0u64).len(), 51);
        list.remove(&200).unwrap();
        assert_eq!(list.items_by_index("parity", &0u64).len(), 50);

        // Unknown names and mistyped keys read as empty.
        assert!(list.items_by_index("nope", &0u64).is_empty());
        assert!(list.items_by_index("parity", &"zero".to_string()).is_empty());
        assert_eq!(
            list.items_by_index_checked("parity", &"zero".to_string()),
            Err(Error::InvalidIndex("parity".to_string()))
        );

        // Registering the same name overwrites.
        list.add_index("parity", |item: &u64| item % 4);
        assert_eq!(list.items_by_index("parity", &3u64).len(), 25);
    }

    #[test]
    fn test_dispose_fails_mutators() {
        let list = ShardedList::<u64>::new();
        list.add(1).unwrap();
        list.dispose();
        list.dispose();

        assert_eq!(list.add(2), Err(Error::Disposed));
        assert_eq!(list.remove(&1), Err(Error::Disposed));
        assert_eq!(list.add_range(&[3]), Err(Error::Disposed));
        assert_eq!(list.clear(), Err(Error::Disposed));
        // Reads still work on the disposed container.
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_batch_buckets_return_to_pool() {
        let list = ShardedList::<u64>::new();
        let items = (0..64).collect_vec();
        list.add_range(&items).unwrap();

        // 4 shard arrays remain on loan; buckets and the (unobserved)
        // batch copy all went back.
        assert_eq!(list.pool().outstanding(), SHARDS);
    }
}
