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

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use itertools::Itertools;

/// Smallest pooled capacity class, `1 << MIN_CLASS`.
const MIN_CLASS: u32 = 4;
/// Largest pooled capacity class, `1 << MAX_CLASS`.
const MAX_CLASS: u32 = 24;
/// Retained arrays per capacity class.
const PER_CLASS: usize = 8;

/// A pool of reusable backing arrays in power-of-two capacity classes.
///
/// `acquire` hands out an empty array with at least the requested capacity,
/// `release` clears the array and retains it for reuse. Arrays whose
/// capacity falls outside the pooled classes are simply dropped.
pub struct ArrayPool<T> {
    classes: Vec<ArrayQueue<Vec<T>>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl<T> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArrayPool<T> {
    pub fn new() -> Self {
        let classes = (MIN_CLASS..=MAX_CLASS).map(|_| ArrayQueue::new(PER_CLASS)).collect_vec();
        Self {
            classes,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Capacity class an array of at least `min` elements is served from.
    pub fn class_capacity(min: usize) -> usize {
        min.max(1 << MIN_CLASS).next_power_of_two()
    }

    fn class_of(capacity: usize) -> Option<usize> {
        if !capacity.is_power_of_two() {
            return None;
        }
        let class = capacity.trailing_zeros();
        (MIN_CLASS..=MAX_CLASS).contains(&class).then_some((class - MIN_CLASS) as usize)
    }

    /// Take an empty array with capacity at least `min`.
    pub fn acquire(&self, min: usize) -> Vec<T> {
        let capacity = Self::class_capacity(min);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        match Self::class_of(capacity).and_then(|class| self.classes[class].pop()) {
            Some(array) => array,
            None => Vec::with_capacity(capacity),
        }
    }

    /// Return an array. Contents are dropped, capacity is retained.
    pub fn release(&self, mut array: Vec<T>) {
        array.clear();
        self.released.fetch_add(1, Ordering::Relaxed);
        if let Some(class) = Self::class_of(array.capacity()) {
            let _ = self.classes[class].push(array);
        }
    }

    /// Arrays handed out over the pool's lifetime.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Arrays returned over the pool's lifetime.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Arrays currently on loan.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}
