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

use std::{sync::Arc, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use shoal_common::code::Value;
use shoal_core::{bus::Subscription, event::ChangeEvent};
use tokio::{sync::watch, task::JoinHandle};

use crate::observed::Observed;

/// Membership predicate of a view.
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Source of a fresh container snapshot, used for the initial contents and
/// for rebuilds.
pub type Snapshot<T> = Arc<dyn Fn() -> Vec<T> + Send + Sync>;

/// How a view reacts to in-place `Updated` notifications.
///
/// Opaque `BatchOp` notifications always rebuild, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Keep current items; an in-place update cannot change membership.
    Ignore,
    /// Rebuild from a fresh snapshot.
    Rebuild,
}

/// Tunables of a view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewOptions {
    /// Buffering window applied to the notification stream. Each window
    /// closing applies its events in one pass and bumps the version once.
    pub throttle: Duration,
    pub update_policy: UpdatePolicy,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(50),
            update_policy: UpdatePolicy::Ignore,
        }
    }
}

/// Live filtered projection of a container.
///
/// The view snapshots the container on construction, then applies the
/// notification stream in throttled windows. Dropping the view only stops
/// its worker; the container is not affected.
pub struct View<T>
where
    T: Value,
{
    observed: Arc<Observed<T>>,
    version: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl<T> View<T>
where
    T: Value,
{
    /// Build a view on the ambient tokio runtime.
    pub fn new(stream: Subscription<T>, snapshot: Snapshot<T>, filter: Filter<T>, options: ViewOptions) -> Self {
        Self::build(stream, snapshot, filter, None, options, &tokio::runtime::Handle::current())
    }

    /// Build a view whose predicate follows `predicates`: each new filter
    /// rebuilds from a fresh snapshot, then streaming resumes under it.
    pub fn dynamic(
        stream: Subscription<T>,
        snapshot: Snapshot<T>,
        initial: Filter<T>,
        predicates: flume::Receiver<Filter<T>>,
        options: ViewOptions,
    ) -> Self {
        Self::build(
            stream,
            snapshot,
            initial,
            Some(predicates),
            options,
            &tokio::runtime::Handle::current(),
        )
    }

    /// Build a view scheduling its worker on an explicit runtime.
    pub fn with_runtime(
        stream: Subscription<T>,
        snapshot: Snapshot<T>,
        filter: Filter<T>,
        options: ViewOptions,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        Self::build(stream, snapshot, filter, None, options, runtime)
    }

    fn build(
        stream: Subscription<T>,
        snapshot: Snapshot<T>,
        filter: Filter<T>,
        predicates: Option<flume::Receiver<Filter<T>>>,
        options: ViewOptions,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let initial = snapshot().into_iter().filter(|item| filter(item)).collect_vec();
        let (observed, version) = Observed::new(initial);
        let worker = Worker {
            stream,
            predicates,
            filter,
            snapshot,
            observed: observed.clone(),
            options,
        };
        let task = runtime.spawn(worker.run());
        Self {
            observed,
            version,
            task,
        }
    }

    /// Snapshot of the view contents, in application order.
    pub fn items(&self) -> Vec<T> {
        self.observed.items()
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.observed.contains(item)
    }

    /// Applied-window count so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Version stream; one tick per applied window.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }

    /// Complete after the next applied window.
    pub async fn changed(&self) {
        let mut version = self.version.clone();
        let _ = version.changed().await;
    }

    /// Complete once at least `at_least` windows have been applied.
    pub async fn wait_version(&self, at_least: u64) {
        let mut version = self.version.clone();
        let _ = version.wait_for(|version| *version >= at_least).await;
    }
}

impl<T> Drop for View<T>
where
    T: Value,
{
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker<T>
where
    T: Value,
{
    stream: Subscription<T>,
    predicates: Option<flume::Receiver<Filter<T>>>,
    filter: Filter<T>,
    snapshot: Snapshot<T>,
    observed: Arc<Observed<T>>,
    options: ViewOptions,
}

async fn next_filter<T>(predicates: &Option<flume::Receiver<Filter<T>>>) -> Option<Filter<T>> {
    match predicates {
        Some(stream) => stream.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

impl<T> Worker<T>
where
    T: Value,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.stream.recv_async() => {
                    let Ok(event) = event else { break };
                    if self.buffer_window(event).await {
                        break;
                    }
                }
                filter = next_filter(&self.predicates) => {
                    match filter {
                        Some(filter) => {
                            tracing::trace!("[view]: predicate swapped, rebuilding");
                            self.filter = filter;
                            self.resnapshot();
                        }
                        // The predicate stream ended; keep the last filter.
                        None => self.predicates = None,
                    }
                }
            }
        }
        tracing::trace!("[view]: worker exits");
    }

    /// Collect everything arriving before the throttle deadline, then
    /// apply the whole window in one pass. Returns true when the stream
    /// completed.
    async fn buffer_window(&mut self, first: ChangeEvent<T>) -> bool {
        let mut window = vec![first];
        let deadline = tokio::time::Instant::now() + self.options.throttle;
        let mut closed = false;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.recv_async()).await {
                Ok(Ok(event)) => window.push(event),
                Ok(Err(_)) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }
        self.apply(window);
        closed
    }

    fn apply(&mut self, window: Vec<ChangeEvent<T>>) {
        let filter = &self.filter;
        let snapshot = &self.snapshot;
        let update_policy = self.options.update_policy;
        self.observed.apply(|items| {
            let mut rebuild = false;
            for event in window {
                match event {
                    ChangeEvent::Added(item) => {
                        if filter(&item) {
                            items.push(item);
                        }
                    }
                    ChangeEvent::Removed(item) => {
                        if let Some(at) = items.iter().position(|present| *present == item) {
                            items.remove(at);
                        }
                    }
                    ChangeEvent::Updated(_) => {
                        if update_policy == UpdatePolicy::Rebuild {
                            rebuild = true;
                        }
                    }
                    ChangeEvent::Cleared => items.clear(),
                    ChangeEvent::BatchAdded(batch) => {
                        for item in batch.items() {
                            if filter(item) {
                                items.push(item.clone());
                            }
                        }
                    }
                    ChangeEvent::BatchRemoved(batch) => {
                        for item in batch.items() {
                            if let Some(at) = items.iter().position(|present| present == item) {
                                items.remove(at);
                            }
                        }
                    }
                    ChangeEvent::BatchOp(_) => rebuild = true,
                }
            }
            if rebuild {
                *items = snapshot().into_iter().filter(|item| filter(item)).collect_vec();
            }
        });
    }

    fn resnapshot(&mut self) {
        let filter = &self.filter;
        let snapshot = &self.snapshot;
        self.observed.apply(|items| {
            *items = snapshot().into_iter().filter(|item| filter(item)).collect_vec();
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shoal_core::prelude::*;

    use super::*;

    fn options() -> ViewOptions {
        ViewOptions {
            throttle: Duration::from_millis(20),
            update_policy: UpdatePolicy::Ignore,
        }
    }

    fn even() -> Filter<u64> {
        Arc::new(|item: &u64| item % 2 == 0)
    }

    fn snapshot_of(list: &Arc<ShardedList<u64>>) -> Snapshot<u64> {
        let list = list.clone();
        Arc::new(move || list.to_vec())
    }

    /// Events may split across windows, so tests wait for contents rather
    /// than for a specific version.
    async fn wait_until(view: &View<u64>, pred: impl Fn(&[u64]) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pred(&view.items()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("view did not converge");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_initial_snapshot_is_filtered() {
        let list = Arc::new(ShardedList::<u64>::new());
        list.add_range(&(0..10).collect::<Vec<_>>()).unwrap();

        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());
        let mut items = view.items();
        items.sort_unstable();
        assert_eq!(items, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streaming_adds_and_removes() {
        let list = Arc::new(ShardedList::<u64>::new());
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());

        list.add(1).unwrap();
        list.add(2).unwrap();
        list.add(4).unwrap();
        wait_until(&view, |items| items.contains(&2) && items.contains(&4)).await;
        let mut items = view.items();
        items.sort_unstable();
        // 1 failed the filter.
        assert_eq!(items, vec![2, 4]);

        list.remove(&2).unwrap();
        wait_until(&view, |items| !items.contains(&2)).await;
        assert_eq!(view.items(), vec![4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_window_applies_once() {
        let list = Arc::new(ShardedList::<u64>::new());
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());

        list.add_range(&(0..100).collect::<Vec<_>>()).unwrap();
        view.wait_version(1).await;
        assert_eq!(view.len(), 50);
        // One batch notification, one window, one version bump.
        assert_eq!(view.version(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleared_empties_view() {
        let list = Arc::new(ShardedList::<u64>::new());
        list.add_range(&(0..10).collect::<Vec<_>>()).unwrap();
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());

        list.clear().unwrap();
        wait_until(&view, |items| items.is_empty()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_op_rebuilds_even_with_ignore_policy() {
        let list = Arc::new(ShardedList::<u64>::new());
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());

        list.edit(|editor| {
            editor.add(1);
            editor.add(2);
            editor.add(3);
            editor.add(4);
        })
        .unwrap();
        wait_until(&view, |items| items.len() == 2).await;

        let mut items = view.items();
        items.sort_unstable();
        assert_eq!(items, vec![2, 4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dynamic_predicate_swap() {
        let list = Arc::new(ShardedList::<u64>::new());
        list.add_range(&(0..10).collect::<Vec<_>>()).unwrap();

        let (predicates_tx, predicates_rx) = flume::unbounded::<Filter<u64>>();
        let view = View::dynamic(list.subscribe(), snapshot_of(&list), even(), predicates_rx, options());
        assert_eq!(view.len(), 5);

        predicates_tx.send(Arc::new(|item: &u64| *item >= 7)).unwrap();
        wait_until(&view, |items| items.len() == 3).await;
        let mut items = view.items();
        items.sort_unstable();
        assert_eq!(items, vec![7, 8, 9]);

        // Streaming resumes under the new predicate.
        list.add(11).unwrap();
        list.add(3).unwrap();
        wait_until(&view, |items| items.contains(&11)).await;
        assert!(!view.contains(&3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_view_drop_leaves_container_running() {
        let list = Arc::new(ShardedList::<u64>::new());
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());
        drop(view);

        list.add(2).unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list.is_disposed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_completion_stops_worker() {
        let list = Arc::new(ShardedList::<u64>::new());
        let view = View::new(list.subscribe(), snapshot_of(&list), even(), options());

        list.add(2).unwrap();
        view.wait_version(1).await;
        list.dispose();

        // The worker exits once the stream completes; the last applied
        // contents stay readable.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(view.items(), vec![2]);
    }
}
