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

use shoal_common::code::{HashBuilder, IndexKey, Item, Value};
use shoal_core::sharded::{ShardedList, ShardedMap};

use crate::view::{Filter, Snapshot, UpdatePolicy, View, ViewOptions};

/// View constructors of a shared [`ShardedList`].
pub trait ShardedListViews<T, S>
where
    T: Item,
    S: HashBuilder,
{
    /// Live projection of the items matching `filter`.
    fn view_filtered(&self, filter: Filter<T>, options: ViewOptions) -> View<T>;

    /// Live projection whose predicate follows `predicates`.
    fn view_dynamic(
        &self,
        initial: Filter<T>,
        predicates: flume::Receiver<Filter<T>>,
        options: ViewOptions,
    ) -> View<T>;

    /// Live projection of the posting list of `key` under the named
    /// secondary index.
    fn view_by_index<Q>(&self, name: &str, key: Q, options: ViewOptions) -> View<T>
    where
        Q: IndexKey;
}

impl<T, S> ShardedListViews<T, S> for Arc<ShardedList<T, S>>
where
    T: Item,
    S: HashBuilder,
{
    fn view_filtered(&self, filter: Filter<T>, options: ViewOptions) -> View<T> {
        let container = self.clone();
        let snapshot: Snapshot<T> = Arc::new(move || container.to_vec());
        View::new(self.subscribe(), snapshot, filter, options)
    }

    fn view_dynamic(
        &self,
        initial: Filter<T>,
        predicates: flume::Receiver<Filter<T>>,
        options: ViewOptions,
    ) -> View<T> {
        let container = self.clone();
        let snapshot: Snapshot<T> = Arc::new(move || container.to_vec());
        View::dynamic(self.subscribe(), snapshot, initial, predicates, options)
    }

    fn view_by_index<Q>(&self, name: &str, key: Q, options: ViewOptions) -> View<T>
    where
        Q: IndexKey,
    {
        let snapshot: Snapshot<T> = {
            let container = self.clone();
            let name = name.to_string();
            let key = key.clone();
            Arc::new(move || container.items_by_index(&name, &key))
        };
        let filter: Filter<T> = {
            let container = self.clone();
            let name = name.to_string();
            Arc::new(move |item: &T| container.item_matches_index(&name, item, &key))
        };
        // Index membership can change under in-place updates.
        let options = ViewOptions {
            update_policy: UpdatePolicy::Rebuild,
            ..options
        };
        View::new(self.subscribe(), snapshot, filter, options)
    }
}

/// View constructors of a shared [`ShardedMap`]. Views observe `(K, V)`
/// pairs.
pub trait ShardedMapViews<K, V, S>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    /// Live projection of the pairs matching `filter`.
    fn view_filtered(&self, filter: Filter<(K, V)>, options: ViewOptions) -> View<(K, V)>;

    /// Live projection whose predicate follows `predicates`.
    fn view_dynamic(
        &self,
        initial: Filter<(K, V)>,
        predicates: flume::Receiver<Filter<(K, V)>>,
        options: ViewOptions,
    ) -> View<(K, V)>;

    /// Live projection of the posting list of `key` under the named
    /// secondary index.
    fn view_by_index<Q>(&self, name: &str, key: Q, options: ViewOptions) -> View<(K, V)>
    where
        Q: IndexKey;
}

impl<K, V, S> ShardedMapViews<K, V, S> for Arc<ShardedMap<K, V, S>>
where
    K: Item,
    V: Value,
    S: HashBuilder,
{
    fn view_filtered(&self, filter: Filter<(K, V)>, options: ViewOptions) -> View<(K, V)> {
        let container = self.clone();
        let snapshot: Snapshot<(K, V)> = Arc::new(move || container.to_vec());
        // Value replacement at an existing key must re-evaluate membership.
        let options = ViewOptions {
            update_policy: UpdatePolicy::Rebuild,
            ..options
        };
        View::new(self.subscribe(), snapshot, filter, options)
    }

    fn view_dynamic(
        &self,
        initial: Filter<(K, V)>,
        predicates: flume::Receiver<Filter<(K, V)>>,
        options: ViewOptions,
    ) -> View<(K, V)> {
        let container = self.clone();
        let snapshot: Snapshot<(K, V)> = Arc::new(move || container.to_vec());
        let options = ViewOptions {
            update_policy: UpdatePolicy::Rebuild,
            ..options
        };
        View::dynamic(self.subscribe(), snapshot, initial, predicates, options)
    }

    fn view_by_index<Q>(&self, name: &str, key: Q, options: ViewOptions) -> View<(K, V)>
    where
        Q: IndexKey,
    {
        let snapshot: Snapshot<(K, V)> = {
            let container = self.clone();
            let name = name.to_string();
            let key = key.clone();
            Arc::new(move || container.items_by_index(&name, &key))
        };
        let filter: Filter<(K, V)> = {
            let container = self.clone();
            let name = name.to_string();
            Arc::new(move |pair: &(K, V)| container.item_matches_index(&name, pair, &key))
        };
        let options = ViewOptions {
            update_policy: UpdatePolicy::Rebuild,
            ..options
        };
        View::new(self.subscribe(), snapshot, filter, options)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shoal_core::prelude::*;

    use super::*;

    fn options() -> ViewOptions {
        ViewOptions {
            throttle: Duration::from_millis(20),
            update_policy: UpdatePolicy::Ignore,
        }
    }

    async fn converge(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if check() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("view did not converge");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_view_by_index() {
        let list = Arc::new(ShardedList::<u64>::new());
        list.add_range(&(0..20).collect::<Vec<_>>()).unwrap();
        list.add_index("mod3", |item: &u64| item % 3);

        let view = list.view_by_index("mod3", 0u64, options());
        assert_eq!(view.len(), 7);

        list.add(21).unwrap();
        converge(|| view.len() == 8).await;

        list.remove(&0).unwrap();
        converge(|| !view.contains(&0)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_map_view_filtered_rebuilds_on_update() {
        let map = Arc::new(ShardedMap::<u64, u64>::new());
        for key in 0..10 {
            map.add(key, 0).unwrap();
        }

        let view = map.view_filtered(Arc::new(|pair: &(u64, u64)| pair.1 > 0), options());
        assert!(view.is_empty());

        map.add_or_update(3, 7).unwrap();
        converge(|| view.items() == vec![(3, 7)]).await;

        // Updating back out of the filter drops the pair again.
        map.add_or_update(3, 0).unwrap();
        converge(|| view.is_empty()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_map_view_by_value_index() {
        let map = Arc::new(ShardedMap::<u64, &'static str>::new());
        map.add_value_index("dept", |value: &&'static str| *value);
        for id in 0..30u64 {
            let dept = if id % 3 == 0 { "HR" } else { "ENG" };
            map.add(id, dept).unwrap();
        }

        let view = map.view_by_index("dept", "HR", options());
        converge(|| view.len() == 10).await;

        map.remove(&0).unwrap();
        converge(|| view.len() == 9).await;
    }
}
