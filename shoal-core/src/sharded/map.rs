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
    code::{HashBuilder, IndexKey, Item, Value},
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
    store::ShardMap,
};

/// Thread-safe map split across [`SHARDS`] shards, each behind its own
/// readers-writer lock. Notifications carry `(K, V)` pairs; bulk
/// operations surface as a single batch notification.
///
/// Iteration order is "shard 0, then 1, 2, 3"; order inside a shard is
/// unspecified and may change across resizes.
pub struct ShardedMap<K, V, S = RandomState>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    shards: [RwLock<ShardMap<K, V, S>>; SHARDS],
    indices: RwLock<HashMap<String, Arc<dyn ItemIndex<(K, V)>>>>,
    bus: ChangeBus<(K, V)>,
    pair_pool: Arc<ArrayPool<(K, V)>>,
    key_pool: Arc<ArrayPool<K>>,
    hash_builder: S,
    counters: Arc<Counters>,
    disposed: AtomicBool,
    options: ShardedOptions,
}

/// Builder of a [`ShardedMap`].
pub struct ShardedMapBuilder<S = RandomState>
where
    S: HashBuilder,
{
    options: ShardedOptions,
    hash_builder: S,
}

impl Default for ShardedMapBuilder<RandomState> {
    fn default() -> Self {
        Self {
            options: ShardedOptions::default(),
            hash_builder: RandomState::default(),
        }
    }
}

impl<S> ShardedMapBuilder<S>
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

    pub fn with_hash_builder<S2>(self, hash_builder: S2) -> ShardedMapBuilder<S2>
    where
        S2: HashBuilder,
    {
        ShardedMapBuilder {
            options: self.options,
            hash_builder,
        }
    }

    pub fn build<K, V>(self) -> ShardedMap<K, V, S>
    where
        K: Item,
        V: Value,
    {
        let counters = Arc::new(Counters::default());
        let shards = std::array::from_fn(|_| {
            RwLock::new(ShardMap::with_hasher(
                self.hash_builder.clone(),
                self.options.shard_capacity,
            ))
        });
        ShardedMap {
            shards,
            indices: RwLock::new(HashMap::new()),
            bus: ChangeBus::new(counters.clone()),
            pair_pool: Arc::new(ArrayPool::new()),
            key_pool: Arc::new(ArrayPool::new()),
            hash_builder: self.hash_builder,
            counters,
            disposed: AtomicBool::new(false),
            options: self.options,
        }
    }
}

impl<K, V> ShardedMap<K, V>
where
    K: Item,
    V: Value,
{
    pub fn new() -> Self {
        ShardedMapBuilder::default().build()
    }

    pub fn builder() -> ShardedMapBuilder<RandomState> {
        ShardedMapBuilder::default()
    }
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Item,
    V: Value,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ShardedMap<K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    #[inline(always)]
    fn shard_index(&self, key: &K) -> usize {
        shard_of(self.hash_builder.hash_one(key))
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

    pub fn contains_key(&self, key: &K) -> bool {
        self.shards[self.shard_index(key)].read().contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shards[self.shard_index(key)].read().get(key).cloned()
    }

    /// Add a new key; fails with [`Error::KeyExists`] when it is present.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        self.ensure_live()?;
        let shard = self.shard_index(&key);
        let mut store = self.shards[shard].write();
        store.try_add(key.clone(), value.clone())?;
        let pair = (key, value);
        self.insert_into_indices(&pair);
        self.counters.insert.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::Added(pair));
        Ok(())
    }

    /// As [`Self::add`], but a present key reads as `Ok(false)`.
    pub fn try_add(&self, key: K, value: V) -> Result<bool> {
        match self.add(key, value) {
            Ok(()) => Ok(true),
            Err(Error::KeyExists) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Upsert. A replacement emits `Updated` and reposts the pair in every
    /// index; a fresh key emits `Added`. Returns the previous value.
    pub fn add_or_update(&self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_live()?;
        let shard = self.shard_index(&key);
        let mut store = self.shards[shard].write();
        let previous = store.insert(key.clone(), value.clone());
        let pair = (key, value);
        match previous.as_ref() {
            Some(old) => {
                self.replace_in_indices(&(pair.0.clone(), old.clone()), &pair);
                self.counters.replace.fetch_add(1, Ordering::Relaxed);
                self.bus.emit(ChangeEvent::Updated(pair));
            }
            None => {
                self.insert_into_indices(&pair);
                self.counters.insert.fetch_add(1, Ordering::Relaxed);
                self.bus.emit(ChangeEvent::Added(pair));
            }
        }
        Ok(previous)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_live()?;
        let shard = self.shard_index(key);
        let mut store = self.shards[shard].write();
        let Some(value) = store.remove(key) else {
            return Ok(None);
        };
        let pair = (key.clone(), value.clone());
        self.remove_from_indices(&pair);
        self.counters.remove.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(ChangeEvent::Removed(pair));
        Ok(Some(value))
    }

    /// As [`Self::get`], but a missing key is an error.
    pub fn get_checked(&self, key: &K) -> Result<V> {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    /// Pair at a global 0-based index, mapping through cumulative shard
    /// counts. Linear in shards; order inside a shard is unspecified.
    pub fn get_at(&self, index: usize) -> Result<(K, V)> {
        let mut remaining = index;
        for shard in self.shards.iter() {
            let store = shard.read();
            if let Some((key, value)) = store.at(remaining) {
                return Ok((key.clone(), value.clone()));
            }
            remaining -= store.len();
        }
        Err(Error::OutOfRange {
            index,
            len: index - remaining,
        })
    }

    /// Snapshot of all pairs, shard 0 first. Shard locks are taken in
    /// ascending order and released in descending order.
    pub fn to_vec(&self) -> Vec<(K, V)> {
        let mut guards = self.shards.iter().map(|shard| shard.read()).collect_vec();
        let mut pairs = Vec::with_capacity(guards.iter().map(|guard| guard.len()).sum());
        for guard in guards.iter() {
            pairs.extend(guard.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        pairs
    }

    pub fn keys(&self) -> Vec<K> {
        self.to_vec().into_iter().map(|(key, _)| key).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.to_vec().into_iter().map(|(_, value)| value).collect()
    }

    pub fn iter(&self) -> std::vec::IntoIter<(K, V)> {
        self.to_vec().into_iter()
    }

    fn bucketize_pairs(&self, pairs: &[(K, V)]) -> [Vec<(K, V)>; SHARDS] {
        let mut buckets: [Vec<(K, V)>; SHARDS] =
            std::array::from_fn(|_| self.pair_pool.acquire(pairs.len() / SHARDS + 1));
        for pair in pairs {
            buckets[self.shard_index(&pair.0)].push(pair.clone());
        }
        buckets
    }

    fn bucketize_keys(&self, keys: &[K]) -> [Vec<K>; SHARDS] {
        let mut buckets: [Vec<K>; SHARDS] =
            std::array::from_fn(|_| self.key_pool.acquire(keys.len() / SHARDS + 1));
        for key in keys {
            buckets[self.shard_index(key)].push(key.clone());
        }
        buckets
    }

    fn apply_added(&self, shard: &RwLock<ShardMap<K, V, S>>, bucket: &[(K, V)]) {
        let mut store = shard.write();
        let new_len = store.len() + bucket.len();
        store.ensure_capacity(new_len);
        for (key, value) in bucket {
            match store.insert(key.clone(), value.clone()) {
                Some(old) => {
                    self.replace_in_indices(&(key.clone(), old), &(key.clone(), value.clone()));
                    self.counters.replace.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.insert_into_indices(&(key.clone(), value.clone()));
                    self.counters.insert.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn apply_removed(&self, shard: &RwLock<ShardMap<K, V, S>>, bucket: &[K]) -> Vec<(K, V)> {
        let mut store = shard.write();
        let mut removed = Vec::new();
        for key in bucket {
            if let Some(value) = store.remove(key) {
                let pair = (key.clone(), value);
                self.remove_from_indices(&pair);
                removed.push(pair);
            }
        }
        removed
    }

    /// Upsert every pair, one shard write per non-empty bucket, then emit
    /// a single `BatchAdded` carrying a pooled copy of the input.
    pub fn add_range(&self, pairs: &[(K, V)]) -> Result<()> {
        self.ensure_live()?;
        if pairs.is_empty() {
            return Ok(());
        }

        let buckets = self.bucketize_pairs(pairs);
        if pairs.len() >= self.options.parallel_threshold {
            tracing::trace!("[sharded]: parallel add of {} pairs", pairs.len());
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
            self.pair_pool.release(bucket);
        }

        let mut copy = self.pair_pool.acquire(pairs.len());
        copy.extend_from_slice(pairs);
        self.bus
            .emit(ChangeEvent::BatchAdded(Batch::leased(copy, self.pair_pool.clone())));
        Ok(())
    }

    /// Remove every present key, then emit a single `BatchRemoved`
    /// carrying the removed pairs.
    pub fn remove_keys(&self, keys: &[K]) -> Result<usize> {
        self.ensure_live()?;
        if keys.is_empty() {
            return Ok(0);
        }

        let buckets = self.bucketize_keys(keys);
        let removed: Vec<(K, V)> = if keys.len() >= self.options.parallel_threshold {
            tracing::trace!("[sharded]: parallel remove of {} keys", keys.len());
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
                    .flat_map(|handle| match handle.join() {
                        Ok(removed) => removed,
                        Err(panic) => std::panic::resume_unwind(panic),
                    })
                    .collect()
            })
        } else {
            self.shards
                .iter()
                .zip(buckets.iter())
                .filter(|(_, bucket)| !bucket.is_empty())
                .flat_map(|(shard, bucket)| self.apply_removed(shard, bucket))
                .collect()
        };
        for bucket in buckets {
            self.key_pool.release(bucket);
        }

        let count = removed.len();
        self.counters.remove.fetch_add(count, Ordering::Relaxed);
        let mut payload = self.pair_pool.acquire(count);
        payload.extend(removed);
        self.bus
            .emit(ChangeEvent::BatchRemoved(Batch::leased(payload, self.pair_pool.clone())));
        Ok(count)
    }

    /// Remove every pair matching `predicate`; emits one `BatchOp` when
    /// anything was removed. Returns the removed count.
    pub fn remove_many<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&K, &V) -> bool,
    {
        self.ensure_live()?;
        let mut removed = self.pair_pool.acquire(16);
        for shard in self.shards.iter() {
            let mut store = shard.write();
            let start = removed.len();
            for (key, value) in store.iter() {
                if predicate(key, value) {
                    removed.push((key.clone(), value.clone()));
                }
            }
            for pair in &removed[start..] {
                store.remove(&pair.0);
                self.remove_from_indices(pair);
            }
        }
        let count = removed.len();
        if count == 0 {
            self.pair_pool.release(removed);
            return Ok(0);
        }
        self.counters.remove.fetch_add(count, Ordering::Relaxed);
        self.bus
            .emit(ChangeEvent::BatchOp(Batch::leased(removed, self.pair_pool.clone())));
        Ok(count)
    }

    /// Run `action` against an unlocked, notification-suppressed façade
    /// while all four shard write locks are held (acquired ascending,
    /// released descending). A single `BatchOp` carrying the net added
    /// pairs is emitted after the locks are released.
    ///
    /// `action` must not call back into this container; the shard locks are
    /// not reentrant.
    pub fn edit<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&mut MapEditor<'_, K, V, S>),
    {
        self.ensure_live()?;
        let stores = self.shards.iter().map(|shard| shard.write()).collect_vec();
        let mut editor = MapEditor {
            owner: self,
            stores,
            added: Vec::new(),
        };
        action(&mut editor);
        let MapEditor {
            stores: mut guards,
            added,
            ..
        } = editor;
        while let Some(guard) = guards.pop() {
            drop(guard);
        }

        let mut batch = self.pair_pool.acquire(added.len());
        batch.extend(added);
        self.bus
            .emit(ChangeEvent::BatchOp(Batch::leased(batch, self.pair_pool.clone())));
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

    /// Register a secondary index over `(key, value)` pairs, populated
    /// from the current contents. Registering an existing name overwrites.
    pub fn add_index<Q, F>(&self, name: impl Into<String>, key_of: F)
    where
        Q: IndexKey,
        F: Fn(&(K, V)) -> Q + Send + Sync + 'static,
    {
        let index: Arc<dyn ItemIndex<(K, V)>> = Arc::new(SecondaryIndex::new(Arc::new(key_of)));
        let name = name.into();
        tracing::debug!("[sharded]: building index {name:?}");
        let mut guards = self.shards.iter().map(|shard| shard.read()).collect_vec();
        for guard in guards.iter() {
            for (key, value) in guard.iter() {
                index.insert(&(key.clone(), value.clone()));
            }
        }
        self.indices.write().insert(name, index);
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
    }

    /// Register a secondary index derived from values alone.
    pub fn add_value_index<Q, F>(&self, name: impl Into<String>, key_of: F)
    where
        Q: IndexKey,
        F: Fn(&V) -> Q + Send + Sync + 'static,
    {
        self.add_index(name, move |pair: &(K, V)| key_of(&pair.1));
    }

    fn with_typed_index<Q, R>(
        &self,
        name: &str,
        f: impl FnOnce(&SecondaryIndex<(K, V), Q>) -> R,
    ) -> Option<R>
    where
        Q: IndexKey,
    {
        let indices = self.indices.read();
        let index = indices.get(name)?;
        let typed = index.as_any().downcast_ref::<SecondaryIndex<(K, V), Q>>()?;
        Some(f(typed))
    }

    /// Posting list of `key` under the named index; empty when the index
    /// does not exist or its key type does not match.
    pub fn items_by_index<Q>(&self, name: &str, key: &Q) -> Vec<(K, V)>
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<(K, V), Q>| index.get(key))
            .unwrap_or_default()
    }

    /// As [`Self::items_by_index`], but an unknown name or mismatched key
    /// type is an error.
    pub fn items_by_index_checked<Q>(&self, name: &str, key: &Q) -> Result<Vec<(K, V)>>
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<(K, V), Q>| index.get(key))
            .ok_or_else(|| Error::InvalidIndex(name.to_string()))
    }

    /// Values of the posting list of `key` under the named index.
    pub fn values_by_index<Q>(&self, name: &str, key: &Q) -> Vec<V>
    where
        Q: IndexKey,
    {
        self.items_by_index(name, key)
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    /// Whether `pair` derives `key` under the named index.
    pub fn item_matches_index<Q>(&self, name: &str, pair: &(K, V), key: &Q) -> bool
    where
        Q: IndexKey,
    {
        self.with_typed_index(name, |index: &SecondaryIndex<(K, V), Q>| index.matches(pair, key))
            .unwrap_or(false)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indices.read().keys().cloned().collect()
    }

    fn insert_into_indices(&self, pair: &(K, V)) {
        for index in self.indices.read().values() {
            index.insert(pair);
        }
    }

    fn remove_from_indices(&self, pair: &(K, V)) {
        for index in self.indices.read().values() {
            index.remove(pair);
        }
    }

    fn replace_in_indices(&self, old: &(K, V), new: &(K, V)) {
        for index in self.indices.read().values() {
            index.replace(old, new);
        }
    }

    fn clear_indices(&self) {
        for index in self.indices.read().values() {
            index.clear();
        }
    }

    /// Notification stream; events arrive in drainer order.
    pub fn subscribe(&self) -> Subscription<(K, V)> {
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

    pub fn pair_pool(&self) -> &ArrayPool<(K, V)> {
        &self.pair_pool
    }

    /// Stop the drainer and complete subscriber streams. Mutations after
    /// this fail with [`Error::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("[sharded]: dispose map");
        self.bus.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Per-shard entry counts, shard 0 first.
    pub fn shard_lens(&self) -> [usize; SHARDS] {
        std::array::from_fn(|shard| self.shards[shard].read().len())
    }
}

/// Unlocked façade over all four shards, handed to [`ShardedMap::edit`].
/// Mutations through the editor raise no notifications.
pub struct MapEditor<'a, K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    owner: &'a ShardedMap<K, V, S>,
    stores: Vec<RwLockWriteGuard<'a, ShardMap<K, V, S>>>,
    added: Vec<(K, V)>,
}

impl<K, V, S> MapEditor<'_, K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    /// Upsert; returns the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let shard = self.owner.shard_index(&key);
        let previous = self.stores[shard].insert(key.clone(), value.clone());
        let pair = (key, value);
        match previous.as_ref() {
            Some(old) => self.owner.replace_in_indices(&(pair.0.clone(), old.clone()), &pair),
            None => self.owner.insert_into_indices(&pair),
        }
        if let Some(at) = self.added.iter().position(|(added, _)| *added == pair.0) {
            self.added.swap_remove(at);
        }
        self.added.push(pair);
        previous
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let shard = self.owner.shard_index(key);
        let value = self.stores[shard].remove(key)?;
        self.owner.remove_from_indices(&(key.clone(), value.clone()));
        if let Some(at) = self.added.iter().position(|(added, _)| added == key) {
            self.added.swap_remove(at);
        }
        Some(value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.stores[self.owner.shard_index(key)].get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.stores[self.owner.shard_index(key)].contains_key(key)
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
}
