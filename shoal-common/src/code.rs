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

use std::hash::{BuildHasher, Hash};

/// Payload carried by the containers and their notifications.
pub trait Value: Send + Sync + Clone + PartialEq + 'static {}
impl<T: Send + Sync + Clone + PartialEq + 'static> Value for T {}

/// Hashable item stored by the sharded list, and key of the sharded map.
pub trait Item: Value + Hash + Eq {}
impl<T: Value + Hash + Eq> Item for T {}

/// Derived key of a secondary index.
pub trait IndexKey: Send + Sync + Clone + Hash + Eq + 'static {}
impl<T: Send + Sync + Clone + Hash + Eq + 'static> IndexKey for T {}

/// Hash builder shared by a container and its shards.
pub trait HashBuilder: BuildHasher + Clone + Send + Sync + 'static {}
impl<T: BuildHasher + Clone + Send + Sync + 'static> HashBuilder for T {}

/// 32-bit golden ratio used to spread folded hashes across buckets and shards.
pub const GOLDEN_RATIO: u32 = 0x9e37_79b9;

/// Fold a 64-bit hash into the 31-bit form stored by the leaf tables.
///
/// The top bit is always zero so the folded hash never collides with the
/// sentinel space of the chain encoding.
#[inline(always)]
pub fn fold_hash(hash: u64) -> u32 {
    ((hash >> 32) as u32 ^ hash as u32) & 0x7fff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_hash_masks_top_bit() {
        for hash in [0u64, u64::MAX, 0xdead_beef_cafe_babe, 1 << 63] {
            assert_eq!(fold_hash(hash) & 0x8000_0000, 0);
        }
    }
}
