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

//! shoal is an in-memory, thread-safe reactive collection engine: sharded
//! list and map containers whose mutations surface as a stream of change
//! notifications, plus throttled filtered views over that stream.

pub use shoal_common::{
    batch::Batch,
    code::{HashBuilder, IndexKey, Item, Value},
    pool::ArrayPool,
};
pub use shoal_core::{
    bus::{ChangeBus, Subscription},
    error::{Error, Result},
    event::{ChangeAction, ChangeEvent},
    index::{ItemIndex, SecondaryIndex},
    legacy::{ChangedHandler, CollectionChange, Dispatcher},
    metrics::Counters,
    sharded::{
        ListEditor, MapEditor, ShardedList, ShardedListBuilder, ShardedMap, ShardedMapBuilder, ShardedOptions,
        SHARDS,
    },
    store::{ShardList, ShardMap},
};
pub use shoal_view::{Filter, ShardedListViews, ShardedMapViews, Snapshot, UpdatePolicy, View, ViewOptions};

pub mod prelude {
    pub use crate::{
        Batch, ChangeAction, ChangeEvent, CollectionChange, Error, Result, ShardedList, ShardedListViews,
        ShardedMap, ShardedMapViews, ShardedOptions, UpdatePolicy, View, ViewOptions,
    };
}
