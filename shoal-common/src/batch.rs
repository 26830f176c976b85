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

use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::pool::ArrayPool;

/// A pooled array lease carried inside batch notifications.
///
/// Clones share the lease. The backing array is cleared and returned to its
/// pool exactly once, when the last clone drops.
pub struct Batch<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    items: Vec<T>,
    pool: Option<Arc<ArrayPool<T>>>,
}

impl<T> Batch<T> {
    /// Lease `items` against `pool`.
    pub fn leased(items: Vec<T>, pool: Arc<ArrayPool<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                items,
                pool: Some(pool),
            }),
        }
    }

    /// Wrap a plain array with no pool behind it.
    pub fn detached(items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(Inner { items, pool: None }),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.inner.items
    }

    pub fn len(&self) -> usize {
        self.inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }
}

impl<T> Clone for Batch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deref for Batch<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.items()
    }
}

impl<T> Debug for Batch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.len())
            .field("leased", &self.inner.pool.is_some())
            .finish()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.items));
        }
    }
}
