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

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    event::ChangeEvent,
    legacy::{ChangedHandler, Dispatcher, LegacySink},
    metrics::Counters,
};

enum Message<T> {
    Event(ChangeEvent<T>),
    Shutdown,
}

/// Stream of change notifications handed to a subscriber.
///
/// The stream completes when the container is disposed.
pub type Subscription<T> = flume::Receiver<ChangeEvent<T>>;

struct Shared<T> {
    subscribers: RwLock<Vec<flume::Sender<ChangeEvent<T>>>>,
    subscriber_count: AtomicUsize,
    legacy: RwLock<Option<LegacySink>>,
    legacy_registered: AtomicBool,
    counters: Arc<Counters>,
}

/// Queue, drainer and fan-out carrying container notifications.
///
/// Ingress is an unbounded multi-producer queue, so [`ChangeBus::emit`]
/// never blocks a mutator. A dedicated drainer thread pops notifications
/// and republishes them to every subscriber, then to the legacy sink when
/// one is registered.
pub struct ChangeBus<T> {
    tx: flume::Sender<Message<T>>,
    shared: Arc<Shared<T>>,
    drainer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<T> ChangeBus<T>
where
    T: Send + Sync + Clone + 'static,
{
    pub fn new(counters: Arc<Counters>) -> Self {
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            subscribers: RwLock::new(Vec::new()),
            subscriber_count: AtomicUsize::new(0),
            legacy: RwLock::new(None),
            legacy_registered: AtomicBool::new(false),
            counters,
        });
        let drainer = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("shoal-bus".to_string())
                .spawn(move || drain(rx, shared))
                .expect("spawn change bus drainer")
        };
        Self {
            tx,
            shared,
            drainer: Mutex::new(Some(drainer)),
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> ChangeBus<T> {
    /// True when no subscriber and no legacy sink would observe an event.
    fn is_idle(&self) -> bool {
        self.shared.subscriber_count.load(Ordering::Acquire) == 0
            && !self.shared.legacy_registered.load(Ordering::Acquire)
    }

    /// Enqueue a notification; never blocks the mutator.
    ///
    /// Without observers the event is dropped on the spot, and any batch
    /// lease it carries is returned with it.
    pub fn emit(&self, event: ChangeEvent<T>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.is_idle() {
            tracing::trace!("[bus]: drop {:?} without observers", event.action());
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.counters.emit.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(Message::Event(event));
    }

    /// Register a subscriber. Events arrive in drainer order.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = flume::unbounded();
        let mut subscribers = self.shared.subscribers.write();
        subscribers.push(tx);
        self.shared.subscriber_count.fetch_add(1, Ordering::Release);
        rx
    }

    pub fn set_legacy(&self, handler: ChangedHandler, dispatcher: Option<Dispatcher>) {
        *self.shared.legacy.write() = Some(LegacySink::new(handler, dispatcher));
        self.shared.legacy_registered.store(true, Ordering::Release);
    }

    pub fn clear_legacy(&self) {
        self.shared.legacy_registered.store(false, Ordering::Release);
        *self.shared.legacy.write() = None;
    }

    /// Stop the drainer after the queue runs dry and complete every
    /// subscriber stream. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.drainer.lock().take() {
            let _ = handle.join();
        }
        self.shared.subscribers.write().clear();
        self.shared.subscriber_count.store(0, Ordering::Release);
    }
}

impl<T> Drop for ChangeBus<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain<T: Clone>(rx: flume::Receiver<Message<T>>, shared: Arc<Shared<T>>) {
    while let Ok(message) = rx.recv() {
        let event = match message {
            Message::Event(event) => event,
            Message::Shutdown => break,
        };
        publish(&shared, event);
    }
    tracing::trace!("[bus]: drainer exits");
}

fn publish<T: Clone>(shared: &Shared<T>, event: ChangeEvent<T>) {
    let disconnected = {
        let subscribers = shared.subscribers.read();
        let mut disconnected = false;
        for tx in subscribers.iter() {
            if tx.send(event.clone()).is_err() {
                disconnected = true;
            }
        }
        disconnected
    };
    if disconnected {
        let mut subscribers = shared.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|tx| !tx.is_disconnected());
        let pruned = before - subscribers.len();
        if pruned > 0 {
            shared.subscriber_count.fetch_sub(pruned, Ordering::Release);
            tracing::trace!("[bus]: pruned {pruned} dropped subscribers");
        }
    }
    if shared.legacy_registered.load(Ordering::Acquire) {
        if let Some(sink) = shared.legacy.read().as_ref() {
            sink.deliver(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use shoal_common::{batch::Batch, pool::ArrayPool};

    use super::*;
    use crate::{event::ChangeAction, legacy::CollectionChange};

    fn bus() -> (ChangeBus<u64>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (ChangeBus::new(counters.clone()), counters)
    }

    #[test_log::test]
    fn test_subscriber_receives_in_order() {
        let (bus, _) = bus();
        let rx = bus.subscribe();

        bus.emit(ChangeEvent::Added(1));
        bus.emit(ChangeEvent::Removed(1));
        bus.emit(ChangeEvent::Cleared);

        let actions: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap().action())
            .collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Added, ChangeAction::Removed, ChangeAction::Cleared]
        );
    }

    #[test]
    fn test_fast_path_drops_without_observers() {
        let (bus, counters) = bus();
        let pool = Arc::new(ArrayPool::new());
        let items = pool.acquire(4);

        bus.emit(ChangeEvent::BatchAdded(Batch::leased(items, pool.clone())));

        assert_eq!(counters.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(counters.emit.load(Ordering::Relaxed), 0);
        // The lease was dropped with the event and the array went home.
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_legacy_sink_keeps_queue_alive() {
        let (bus, counters) = bus();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.set_legacy(Arc::new(move |change| seen.lock().unwrap().push(change)), None);
        }

        bus.emit(ChangeEvent::Updated(7));
        bus.close();

        assert_eq!(counters.emit.load(Ordering::Relaxed), 1);
        assert_eq!(*seen.lock().unwrap(), vec![CollectionChange::Replace]);
    }

    #[test]
    fn test_close_completes_subscriber_streams() {
        let (bus, _) = bus();
        let rx = bus.subscribe();

        bus.emit(ChangeEvent::Added(3));
        bus.close();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap().item(),
            Some(&3)
        );
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
        // Emits after close are ignored.
        bus.emit(ChangeEvent::Added(4));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (bus, _) = bus();
        let rx = bus.subscribe();
        let keep = bus.subscribe();
        drop(rx);

        bus.emit(ChangeEvent::Added(1));
        assert!(keep.recv_timeout(Duration::from_secs(1)).is_ok());

        bus.emit(ChangeEvent::Added(2));
        assert!(keep.recv_timeout(Duration::from_secs(1)).is_ok());
    }
}
