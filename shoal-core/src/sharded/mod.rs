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

use serde::{Deserialize, Serialize};
use shoal_common::code::{fold_hash, GOLDEN_RATIO};

pub mod list;
pub mod map;

pub use list::{ListEditor, ShardedList, ShardedListBuilder};
pub use map::{MapEditor, ShardedMap, ShardedMapBuilder};

/// Shard count of every container. Routing takes the top two bits of the
/// spread hash, so the count is fixed.
pub const SHARDS: usize = 4;

/// Shard of a 64-bit hash. Deterministic for a given hash.
#[inline(always)]
pub(crate) fn shard_of(hash: u64) -> usize {
    (fold_hash(hash).wrapping_mul(GOLDEN_RATIO) >> 30) as usize & (SHARDS - 1)
}

/// Tunables shared by the sharded containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardedOptions {
    /// Initial capacity of each shard's leaf store.
    pub shard_capacity: usize,
    /// Batch size from which shards are written in parallel.
    pub parallel_threshold: usize,
}

impl Default for ShardedOptions {
    fn default() -> Self {
        Self {
            shard_capacity: 16,
            parallel_threshold: 256,
        }
    }
}
