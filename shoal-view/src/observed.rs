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

use parking_lot::RwLock;
use shoal_common::code::Value;
use tokio::sync::watch;

/// Shared, versioned item buffer a view maintains.
///
/// The version bumps once per applied batch window, never per element, so
/// a bound consumer re-reads at most once per throttle tick.
pub struct Observed<T> {
    items: RwLock<Vec<T>>,
    version: watch::Sender<u64>,
}

impl<T> Observed<T>
where
    T: Value,
{
    pub(crate) fn new(initial: Vec<T>) -> (Arc<Self>, watch::Receiver<u64>) {
        let (version, subscription) = watch::channel(0);
        (
            Arc::new(Self {
                items: RwLock::new(initial),
                version,
            }),
            subscription,
        )
    }

    /// Snapshot of the current contents, in application order.
    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.read().contains(item)
    }

    /// Mutate the buffer and publish a single version bump.
    pub(crate) fn apply(&self, mutate: impl FnOnce(&mut Vec<T>)) {
        {
            let mut items = self.items.write();
            mutate(&mut items);
        }
        self.version.send_modify(|version| *version += 1);
    }
}
