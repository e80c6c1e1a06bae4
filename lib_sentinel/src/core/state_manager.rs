//! # State Manager
//!
//! Owns the canonical [`Snapshot`] and is its only writer.
//!
//! Partial updates are deep-merged into a pending buffer and flushed after a
//! debounce window: every write re-arms a single timer, so a burst of writes
//! produces one flush and one notification. A flush publishes a fresh
//! `Arc<Snapshot>`; every subscriber of that flush receives the same pointer.
//!
//! Without a ceiling, writes that keep arriving faster than the debounce delay
//! postpone the flush indefinitely. [`StateManagerConfig::max_wait`] caps that
//! delay when set.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::core::dispatcher::{Dispatcher, Subscription};
use crate::core::merge::deep_merge;
use crate::model::{Snapshot, MAX_RECENT_ALERTS};

#[derive(Debug, Clone, PartialEq)]
pub struct StateManagerConfig {
    /// Debounce window after the last write.
    pub batch_delay: Duration,
    /// Longest a pending write may wait for its flush. `None` is unbounded.
    pub max_wait: Option<Duration>,
    pub history_size: usize,
    pub max_recent_alerts: usize,
    pub cleanup_interval: Duration,
    /// Window over which `metadata.updateFrequency` is measured.
    pub frequency_window: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(16),
            max_wait: None,
            history_size: 50,
            max_recent_alerts: MAX_RECENT_ALERTS,
            cleanup_interval: Duration::from_secs(30),
            frequency_window: Duration::from_secs(5),
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    pub subscribers: usize,
    pub channel_clients: usize,
    pub flush_count: u64,
    pub pending: bool,
    pub history_len: usize,
    pub accepted_updates: u64,
    pub rejected_updates: u64,
    pub subscriber_failures: u64,
}

struct Inner {
    current: Arc<Snapshot>,
    /// Merged candidate state awaiting the next flush.
    pending: Option<Value>,
    pending_since: Option<Instant>,
    flush_task: Option<JoinHandle<()>>,
    cleanup_task: Option<JoinHandle<()>>,
    history: VecDeque<Arc<Snapshot>>,
    update_times: VecDeque<Instant>,
    flush_count: u64,
    accepted_updates: u64,
    rejected_updates: u64,
}

impl Inner {
    fn stop_flush_timer(&mut self) {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
    }

    fn trim_update_times(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(front) = self.update_times.front() {
            if now.duration_since(*front) > window {
                self.update_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn trim_history(&mut self, max: usize) {
        while self.history.len() > max {
            self.history.pop_front();
        }
    }
}

struct Shared {
    config: StateManagerConfig,
    inner: Mutex<Inner>,
    dispatcher: Dispatcher<Arc<Snapshot>>,
    next_client: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|p| p.into_inner());
        inner.stop_flush_timer();
        if let Some(task) = inner.cleanup_task.take() {
            task.abort();
        }
    }
}

/// Cheaply cloneable handle to one state store. Clones share the same snapshot.
#[derive(Clone)]
pub struct StateManager {
    shared: Arc<Shared>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(StateManagerConfig::default())
    }
}

impl StateManager {
    /// Creates a store holding the default snapshot. Inside a Tokio runtime the
    /// periodic cleanup timer starts immediately.
    pub fn new(config: StateManagerConfig) -> Self {
        let manager = Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    current: Arc::new(Snapshot::default()),
                    pending: None,
                    pending_since: None,
                    flush_task: None,
                    cleanup_task: None,
                    history: VecDeque::new(),
                    update_times: VecDeque::new(),
                    flush_count: 0,
                    accepted_updates: 0,
                    rejected_updates: 0,
                }),
                dispatcher: Dispatcher::new(),
                next_client: AtomicU64::new(1),
            }),
        };
        manager.start_cleanup_timer();
        manager
    }

    pub fn config(&self) -> &StateManagerConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn start_cleanup_timer(&self) {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!("no runtime, periodic cleanup disabled");
            return;
        };
        let period = self.shared.config.cleanup_interval;
        if period.is_zero() {
            return;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                StateManager { shared }.run_cleanup();
            }
        });
        self.lock().cleanup_task = Some(task);
    }

    /// A structural copy of the current snapshot.
    pub fn get_current_state(&self) -> Snapshot {
        self.lock().current.as_ref().clone()
    }

    /// The current snapshot pointer, shared with every subscriber of the last flush.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.lock().current)
    }

    /// Queues a partial update (camelCase snapshot fields) for the next flush.
    ///
    /// Non-object input is ignored. A partial that cannot produce a valid
    /// snapshot once merged (unknown enum variant, wrong type) is rejected
    /// without touching the pending buffer.
    pub fn update_state(&self, partial: Value) {
        if !partial.is_object() {
            tracing::warn!(kind = crate::schema::json_kind(&partial), "ignoring non-object state update");
            self.lock().rejected_updates += 1;
            return;
        }

        let mut inner = self.lock();
        let mut candidate = match inner.pending.take() {
            Some(pending) => pending,
            None => match serde_json::to_value(inner.current.as_ref()) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize current snapshot");
                    return;
                }
            },
        };
        let before = candidate.clone();
        deep_merge(&mut candidate, partial);
        if let Err(err) = serde_json::from_value::<Snapshot>(candidate.clone()) {
            tracing::warn!(error = %err, "rejecting state update that does not fit the snapshot model");
            inner.rejected_updates += 1;
            if inner.pending_since.is_some() {
                inner.pending = Some(before);
            }
            return;
        }

        let now = Instant::now();
        inner.pending = Some(candidate);
        inner.accepted_updates += 1;
        inner.update_times.push_back(now);
        let since = *inner.pending_since.get_or_insert(now);

        let mut deadline = now + self.shared.config.batch_delay;
        if let Some(max_wait) = self.shared.config.max_wait {
            deadline = deadline.min(since + max_wait);
        }

        inner.stop_flush_timer();
        match Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.shared);
                inner.flush_task = Some(handle.spawn(async move {
                    sleep_until(deadline).await;
                    if let Some(shared) = weak.upgrade() {
                        StateManager { shared }.flush_now();
                    }
                }));
            }
            Err(_) => {
                drop(inner);
                self.flush_now();
            }
        }
    }

    /// Applies the pending buffer immediately and notifies subscribers.
    /// Returns `false` when nothing was pending.
    pub fn flush_now(&self) -> bool {
        {
            let mut inner = self.lock();
            inner.stop_flush_timer();
            let Some(pending) = inner.pending.take() else {
                return false;
            };
            inner.pending_since = None;

            let mut next: Snapshot = match serde_json::from_value(pending) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::error!(error = %err, "pending state no longer deserializes, dropping it");
                    inner.rejected_updates += 1;
                    return false;
                }
            };

            let config = &self.shared.config;
            inner.trim_update_times(config.frequency_window);
            let window = config.frequency_window.as_secs_f64();
            next.metadata.last_updated = Utc::now();
            next.metadata.update_frequency =
                (window > 0.0).then(|| inner.update_times.len() as f64 / window);
            next.normalize(config.max_recent_alerts);

            let previous = mem::replace(&mut inner.current, Arc::new(next));
            inner.history.push_back(previous);
            inner.trim_history(config.history_size);
            inner.flush_count += 1;
            tracing::trace!(flush = inner.flush_count, "state flushed");

            // Enqueued under the lock so concurrent flushes publish in flush order.
            self.shared.dispatcher.enqueue(Arc::clone(&inner.current));
        }
        self.shared.dispatcher.drain();
        true
    }

    /// Registers a callback invoked after every flush with the new snapshot.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<Arc<Snapshot>>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .subscribe(move |snapshot: &Arc<Snapshot>| callback(snapshot.as_ref()))
    }

    /// Removes a subscriber by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Hands the current snapshot to one subscriber only.
    pub fn deliver_current(&self, subscriber_id: u64) {
        let current = self.current();
        let _ = self.shared.dispatcher.deliver_to_one(subscriber_id, &current);
    }

    /// A channel that receives every subsequent snapshot. Dropping the
    /// receiver unregisters it on the next flush.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Arc<Snapshot>> {
        let n = self.shared.next_client.fetch_add(1, Ordering::Relaxed);
        self.shared.dispatcher.add_client(&format!("channel-{}", n))
    }

    /// Replaces the snapshot with the default and notifies subscribers. Pending
    /// writes and the flush timer are discarded; the cleanup timer keeps running.
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            inner.stop_flush_timer();
            inner.pending = None;
            inner.pending_since = None;
            inner.history.clear();
            inner.update_times.clear();
            inner.current = Arc::new(Snapshot::default());
            self.shared.dispatcher.enqueue(Arc::clone(&inner.current));
        }
        tracing::info!("state reset to default snapshot");
        self.shared.dispatcher.drain();
    }

    /// Full teardown: stops every timer, drops all subscribers and clears all
    /// internal collections. Nobody is notified.
    pub fn cleanup(&self) {
        let mut inner = self.lock();
        inner.stop_flush_timer();
        if let Some(task) = inner.cleanup_task.take() {
            task.abort();
        }
        inner.pending = None;
        inner.pending_since = None;
        inner.history.clear();
        inner.update_times.clear();
        inner.current = Arc::new(Snapshot::default());
        drop(inner);
        self.shared.dispatcher.clear();
        tracing::debug!("state manager cleaned up");
    }

    /// One pass of the periodic maintenance: trims the update-tracking queue
    /// and history, prunes orphaned threat intelligence and excess alerts from
    /// the current snapshot. Does not notify. Returns the number of pruned items.
    pub fn run_cleanup(&self) -> usize {
        let config = &self.shared.config;
        let mut inner = self.lock();
        inner.trim_update_times(config.frequency_window);
        let history_before = inner.history.len();
        inner.trim_history(config.history_size);
        let mut pruned = history_before - inner.history.len();

        let excess_alerts = inner
            .current
            .alerts
            .recent_alerts
            .len()
            .saturating_sub(config.max_recent_alerts);
        let live: std::collections::HashSet<&str> =
            inner.current.intruders.iter().map(|i| i.id.as_str()).collect();
        let has_orphans = inner
            .current
            .threat_intelligence
            .keys()
            .any(|id| !live.contains(id.as_str()));

        if excess_alerts > 0 || has_orphans {
            let mut trimmed = inner.current.as_ref().clone();
            pruned += trimmed.prune_orphans();
            trimmed.alerts.recent_alerts.drain(..excess_alerts);
            pruned += excess_alerts;
            inner.current = Arc::new(trimmed);
        }
        if pruned > 0 {
            tracing::debug!(pruned, "periodic cleanup pruned state");
        }
        pruned
    }

    /// Retained previous snapshots, oldest first.
    pub fn history(&self) -> Vec<Arc<Snapshot>> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> StateStats {
        let dispatch = self.shared.dispatcher.stats();
        let inner = self.lock();
        StateStats {
            subscribers: dispatch.subscribers,
            channel_clients: dispatch.clients,
            flush_count: inner.flush_count,
            pending: inner.pending.is_some(),
            history_len: inner.history.len(),
            accepted_updates: inner.accepted_updates,
            rejected_updates: inner.rejected_updates,
            subscriber_failures: dispatch.failures,
        }
    }
}
