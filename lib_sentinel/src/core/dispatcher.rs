//! # Snapshot Dispatcher
//!
//! Fans every published item out to two kinds of consumers:
//!
//! - **callbacks** registered with [`Dispatcher::subscribe`], invoked synchronously
//!   on the publishing thread;
//! - **channel clients** registered with [`Dispatcher::add_client`], fed through an
//!   unbounded MPSC channel and pruned as soon as their receiver is dropped.
//!
//! Items are wrapped by the caller (typically `Arc<Snapshot>`), so a fan-out
//! clones a pointer per consumer and never the payload.
//!
//! ## Delivery order
//!
//! Publishing goes through a FIFO queue with a single drainer. A callback that
//! triggers another publish only enqueues; the outer drain delivers it after
//! the current item reached every consumer. All consumers therefore observe
//! items in enqueue order, even under re-entrancy.
//!
//! ## Isolation
//!
//! Each callback runs under `catch_unwind`. A panicking subscriber is logged as
//! a [`SubscriberError`] and counted; the remaining subscribers still run.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

use crate::errors::SubscriberError;

/// A registered subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ClientHandle<T> {
    id: String,
    sender: mpsc::UnboundedSender<T>,
}

struct Consumers<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
    clients: Vec<ClientHandle<T>>,
}

struct DeliveryQueue<T> {
    items: VecDeque<T>,
    draining: bool,
}

struct DispatchInner<T> {
    consumers: Mutex<Consumers<T>>,
    queue: Mutex<DeliveryQueue<T>>,
    delivered: AtomicU64,
    failures: AtomicU64,
}

/// Counters exposed for introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub subscribers: usize,
    pub clients: usize,
    pub delivered: u64,
    pub failures: u64,
}

/// Handle returned by [`Dispatcher::subscribe`].
#[must_use = "dropping the handle keeps the callback registered; call `unsubscribe` to remove it"]
pub struct Subscription<T> {
    id: u64,
    inner: Weak<DispatchInner<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the callback. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => lock(&inner.consumers).callbacks.remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct Dispatcher<T> {
    inner: Arc<DispatchInner<T>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<M>(mutex: &Mutex<M>) -> MutexGuard<'_, M> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                consumers: Mutex::new(Consumers {
                    next_id: 1,
                    callbacks: BTreeMap::new(),
                    clients: Vec::new(),
                }),
                queue: Mutex::new(DeliveryQueue {
                    items: VecDeque::new(),
                    draining: false,
                }),
                delivered: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a callback for every subsequently published item.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut consumers = lock(&self.inner.consumers);
        let id = consumers.next_id;
        consumers.next_id += 1;
        consumers.callbacks.insert(id, Arc::new(callback));
        tracing::debug!(subscriber_id = id, "subscriber registered");
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a callback by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) -> bool {
        lock(&self.inner.consumers).callbacks.remove(&id).is_some()
    }

    /// Registers a channel client. The client is dropped from the fan-out the
    /// first time a send fails because its receiver is gone.
    pub fn add_client(&self, id: &str) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.consumers).clients.push(ClientHandle {
            id: id.to_string(),
            sender: tx,
        });
        tracing::info!(client = id, "channel client registered");
        rx
    }

    pub fn remove_client(&self, id: &str) {
        lock(&self.inner.consumers).clients.retain(|c| c.id != id);
        tracing::info!(client = id, "channel client removed");
    }

    /// Enqueues and delivers `item` to every consumer.
    pub fn broadcast(&self, item: T) {
        self.enqueue(item);
        self.drain();
    }

    /// Enqueues `item` without delivering it. Callers that must fix the order
    /// of items while holding their own lock enqueue under that lock and
    /// [`drain`](Self::drain) after releasing it.
    pub fn enqueue(&self, item: T) {
        lock(&self.inner.queue).items.push_back(item);
    }

    /// Delivers queued items until the queue is empty. Returns immediately if
    /// another call is already draining; that call delivers what was queued.
    pub fn drain(&self) {
        {
            let mut queue = lock(&self.inner.queue);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        loop {
            let next = {
                let mut queue = lock(&self.inner.queue);
                match queue.items.pop_front() {
                    Some(item) => item,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&next);
        }
    }

    /// Invokes a single callback with `item`, isolating panics. Used to hand a
    /// new subscriber the current value without notifying everyone else.
    pub fn deliver_to_one(&self, id: u64, item: &T) -> Result<(), SubscriberError> {
        let callback = lock(&self.inner.consumers).callbacks.get(&id).cloned();
        match callback {
            Some(cb) => self.invoke(id, &cb, item),
            None => Ok(()),
        }
    }

    /// Drops every callback and channel client.
    pub fn clear(&self) {
        let mut consumers = lock(&self.inner.consumers);
        consumers.callbacks.clear();
        consumers.clients.clear();
        lock(&self.inner.queue).items.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.consumers).callbacks.len()
    }

    pub fn stats(&self) -> DispatchStats {
        let consumers = lock(&self.inner.consumers);
        DispatchStats {
            subscribers: consumers.callbacks.len(),
            clients: consumers.clients.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, item: &T) {
        // Callbacks run without any dispatcher lock held so they may subscribe,
        // unsubscribe or publish from inside the callback.
        let callbacks: Vec<(u64, Callback<T>)> = lock(&self.inner.consumers)
            .callbacks
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, cb) in &callbacks {
            let _ = self.invoke(*id, cb, item);
        }

        lock(&self.inner.consumers).clients.retain(|client| {
            match client.sender.send(item.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::info!(client = %client.id, "channel client disconnected, removing");
                    false
                }
            }
        });
    }

    fn invoke(&self, id: u64, cb: &Callback<T>, item: &T) -> Result<(), SubscriberError> {
        match catch_unwind(AssertUnwindSafe(|| cb(item))) {
            Ok(()) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(payload) => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                let err = SubscriberError {
                    subscriber_id: id,
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!(subscriber_id = id, error = %err, "subscriber callback panicked");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn every_subscriber_sees_every_item() {
        let dispatcher = Dispatcher::<Arc<u32>>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = Arc::clone(&seen);
        let s2 = Arc::clone(&seen);
        let _a = dispatcher.subscribe(move |v: &Arc<u32>| s1.lock().unwrap().push(("a", **v)));
        let _b = dispatcher.subscribe(move |v: &Arc<u32>| s2.lock().unwrap().push(("b", **v)));

        dispatcher.broadcast(Arc::new(1));
        dispatcher.broadcast(Arc::new(2));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let dispatcher = Dispatcher::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = dispatcher.subscribe(|_| panic!("boom"));
        let h = Arc::clone(&hits);
        let _good = dispatcher.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.broadcast(1);
        dispatcher.broadcast(2);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.stats().failures, 2);
    }

    #[test]
    fn reentrant_publish_is_delivered_in_order() {
        let dispatcher = Dispatcher::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let d = dispatcher.clone();
        let _first = dispatcher.subscribe(move |v| {
            if *v == 1 {
                d.broadcast(2);
            }
        });
        let o = Arc::clone(&order);
        let _second = dispatcher.subscribe(move |v| o.lock().unwrap().push(*v));

        dispatcher.broadcast(1);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let dispatcher = Dispatcher::<u32>::new();
        let sub = dispatcher.subscribe(|_| {});
        let id = sub.id();
        assert!(sub.unsubscribe());
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_from_inside_callback() {
        let dispatcher = Dispatcher::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let d = dispatcher.clone();
        let h = Arc::clone(&hits);
        let _sub = dispatcher.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            d.unsubscribe(1);
        });
        dispatcher.broadcast(1);
        dispatcher.broadcast(2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_clients_are_pruned() {
        let dispatcher = Dispatcher::<Arc<String>>::new();
        let mut keep = dispatcher.add_client("keep");
        let gone = dispatcher.add_client("gone");
        drop(gone);

        dispatcher.broadcast(Arc::new("hello".to_string()));

        assert_eq!(keep.recv().await.as_deref().map(String::as_str), Some("hello"));
        assert_eq!(dispatcher.stats().clients, 1);
    }
}
