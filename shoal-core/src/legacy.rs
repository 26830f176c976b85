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

use crate::event::{ChangeAction, ChangeEvent};

/// Coarse-grained change surfaced to a legacy collection-changed sink.
///
/// A sharded container cannot provide stable indices to a consumer that
/// models a single flat collection, so membership changes collapse to
/// [`CollectionChange::Reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChange {
    /// Membership changed; the consumer must re-read.
    Reset,
    /// A value was replaced in place.
    Replace,
}

/// Callback receiving legacy collection-changed events.
pub type ChangedHandler = Arc<dyn Fn(CollectionChange) + Send + Sync>;

/// Marshals a legacy event onto a captured dispatch context, one call per
/// event.
pub type Dispatcher = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

pub(crate) struct LegacySink {
    handler: ChangedHandler,
    dispatcher: Option<Dispatcher>,
}

impl LegacySink {
    pub fn new(handler: ChangedHandler, dispatcher: Option<Dispatcher>) -> Self {
        Self { handler, dispatcher }
    }

    /// Map a stream notification to its legacy rendering and deliver it.
    ///
    /// Any batch carried by `event` stays with the caller; the legacy event
    /// is payload-free.
    pub fn deliver<T>(&self, event: &ChangeEvent<T>) {
        let change = match event.action() {
            ChangeAction::Updated => CollectionChange::Replace,
            _ => CollectionChange::Reset,
        };
        match &self.dispatcher {
            Some(dispatch) => {
                let handler = self.handler.clone();
                dispatch(Box::new(move || handler(change)));
            }
            None => (self.handler)(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use shoal_common::batch::Batch;

    use super::*;

    #[test]
    fn test_action_mapping() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            LegacySink::new(Arc::new(move |change| seen.lock().unwrap().push(change)), None)
        };

        sink.deliver(&ChangeEvent::Added(1));
        sink.deliver(&ChangeEvent::Updated(1));
        sink.deliver(&ChangeEvent::<i32>::Cleared);
        sink.deliver(&ChangeEvent::BatchAdded(Batch::detached(vec![1, 2])));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CollectionChange::Reset,
                CollectionChange::Replace,
                CollectionChange::Reset,
                CollectionChange::Reset,
            ]
        );
    }

    #[test]
    fn test_dispatcher_receives_one_post_per_event() {
        let posts = Arc::new(Mutex::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let dispatcher: Dispatcher = {
            let posts = posts.clone();
            Arc::new(move |event: Box<dyn FnOnce() + Send>| {
                *posts.lock().unwrap() += 1;
                event();
            })
        };
        let sink = {
            let seen = seen.clone();
            LegacySink::new(
                Arc::new(move |change| seen.lock().unwrap().push(change)),
                Some(dispatcher),
            )
        };

        sink.deliver(&ChangeEvent::Removed(9));
        assert_eq!(*posts.lock().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![CollectionChange::Reset]);
    }
}
