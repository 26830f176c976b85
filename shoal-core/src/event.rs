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

use std::fmt::Debug;

use shoal_common::batch::Batch;

/// Kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Added,
    Removed,
    Updated,
    Cleared,
    BatchAdded,
    BatchRemoved,
    BatchOp,
}

/// A single change notification observed on a container stream.
///
/// Single-item actions carry a clone of the item; batch actions carry a
/// pooled batch lease shared across all observers.
#[derive(Clone)]
pub enum ChangeEvent<T> {
    Added(T),
    Removed(T),
    Updated(T),
    Cleared,
    BatchAdded(Batch<T>),
    BatchRemoved(Batch<T>),
    BatchOp(Batch<T>),
}

impl<T> ChangeEvent<T> {
    pub fn action(&self) -> ChangeAction {
        match self {
            Self::Added(_) => ChangeAction::Added,
            Self::Removed(_) => ChangeAction::Removed,
            Self::Updated(_) => ChangeAction::Updated,
            Self::Cleared => ChangeAction::Cleared,
            Self::BatchAdded(_) => ChangeAction::BatchAdded,
            Self::BatchRemoved(_) => ChangeAction::BatchRemoved,
            Self::BatchOp(_) => ChangeAction::BatchOp,
        }
    }

    /// Item carried by a single-item action.
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Added(item) | Self::Removed(item) | Self::Updated(item) => Some(item),
            _ => None,
        }
    }

    /// Batch carried by a batch action.
    pub fn batch(&self) -> Option<&Batch<T>> {
        match self {
            Self::BatchAdded(batch) | Self::BatchRemoved(batch) | Self::BatchOp(batch) => Some(batch),
            _ => None,
        }
    }
}

impl<T> Debug for ChangeEvent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ChangeEvent");
        s.field("action", &self.action());
        if let Some(batch) = self.batch() {
            s.field("len", &batch.len());
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let added = ChangeEvent::Added(42);
        assert_eq!(added.action(), ChangeAction::Added);
        assert_eq!(added.item(), Some(&42));
        assert!(added.batch().is_none());

        let cleared = ChangeEvent::<u64>::Cleared;
        assert_eq!(cleared.action(), ChangeAction::Cleared);
        assert!(cleared.item().is_none());

        let batch = ChangeEvent::BatchAdded(Batch::detached(vec![1, 2]));
        assert_eq!(batch.action(), ChangeAction::BatchAdded);
        assert_eq!(batch.batch().map(|b| b.len()), Some(2));
    }
}
