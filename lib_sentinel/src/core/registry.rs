//! # Subscriber Registry
//!
//! Reference counts the consumers of one upstream feed. The first acquire
//! reports that the feed should start; the last release schedules `on_idle`
//! after a linger period. Re-acquiring during the linger cancels the pending
//! teardown, so a subscriber that quickly leaves and comes back does not cost
//! a reconnect.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct RegistryState {
    count: usize,
    linger_token: CancellationToken,
}

#[derive(Clone)]
pub struct SubscriberRegistry {
    state: Arc<Mutex<RegistryState>>,
    linger: Duration,
}

impl SubscriberRegistry {
    pub fn new(linger: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                count: 0,
                linger_token: CancellationToken::new(),
            })),
            linger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_linger(&mut self, linger: Duration) {
        self.linger = linger;
    }

    pub fn count(&self) -> usize {
        self.lock().count
    }

    /// Adds one consumer. Returns `true` on the 0 -> 1 transition.
    pub fn acquire(&self) -> bool {
        let mut state = self.lock();
        state.count += 1;
        if state.count == 1 {
            // A lingering teardown is pending from the last release; stop it.
            state.linger_token.cancel();
            state.linger_token = CancellationToken::new();
            true
        } else {
            false
        }
    }

    /// Removes one consumer. When the count reaches zero, `on_idle` runs after
    /// the linger period unless someone acquires in the meantime. With no
    /// linger, or outside a runtime, it runs immediately. Returns the new count.
    pub fn release<F>(&self, on_idle: F) -> usize
    where
        F: FnOnce() + Send + 'static,
    {
        let (count, token) = {
            let mut state = self.lock();
            if state.count == 0 {
                return 0;
            }
            state.count -= 1;
            (state.count, state.linger_token.clone())
        };
        if count > 0 {
            return count;
        }

        let runtime = tokio::runtime::Handle::try_current();
        if self.linger.is_zero() || runtime.is_err() {
            on_idle();
            return 0;
        }

        let state = Arc::clone(&self.state);
        let linger = self.linger;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("linger cancelled, subscriber returned");
                }
                _ = sleep(linger) => {
                    let idle = state.lock().map(|s| s.count == 0).unwrap_or_else(|p| p.into_inner().count == 0);
                    if idle {
                        tracing::info!(linger_ms = linger.as_millis() as u64, "linger expired, releasing upstream");
                        on_idle();
                    }
                }
            }
        });
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn counts_transitions() {
        let registry = SubscriberRegistry::new(Duration::ZERO);
        assert!(registry.acquire());
        assert!(!registry.acquire());
        let idle = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&idle);
        assert_eq!(registry.release(move || { i.fetch_add(1, Ordering::SeqCst); }), 1);
        let i = Arc::clone(&idle);
        assert_eq!(registry.release(move || { i.fetch_add(1, Ordering::SeqCst); }), 0);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        // Extra releases are ignored.
        assert_eq!(registry.release(|| panic!("must not run")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reacquire_during_linger_cancels_teardown() {
        let registry = SubscriberRegistry::new(Duration::from_millis(500));
        let idle = Arc::new(AtomicUsize::new(0));

        registry.acquire();
        let i = Arc::clone(&idle);
        registry.release(move || { i.fetch_add(1, Ordering::SeqCst); });
        sleep(Duration::from_millis(200)).await;
        assert!(registry.acquire());
        sleep(Duration::from_millis(600)).await;
        assert_eq!(idle.load(Ordering::SeqCst), 0);

        let i = Arc::clone(&idle);
        registry.release(move || { i.fetch_add(1, Ordering::SeqCst); });
        sleep(Duration::from_millis(600)).await;
        assert_eq!(idle.load(Ordering::SeqCst), 1);
    }
}
