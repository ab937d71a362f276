//! # Escalation Scheduler
//!
//! Cancellable one-shot timers keyed by request id.
//!
//! Each armed timer is a tokio task that sleeps for its delay and then
//! *claims* its entry in the timer table. Only a task that still owns its
//! entry (same ticket) runs its callback, so:
//!
//! - a timer fires at most once per [`schedule`](EscalationScheduler::schedule) call;
//! - [`cancel`](EscalationScheduler::cancel) succeeds right up until the
//!   claim, after which the callback runs to completion;
//! - re-scheduling a key replaces (and aborts) its previous timer.
//!
//! ```text
//!   schedule ──▶ [armed] ──sleep──▶ claim ──▶ on_fire()
//!                   │                 │
//!                cancel           ticket mismatch
//!                   ▼                 ▼
//!               aborted            no-op
//! ```
//!
//! A callback that finds its request already resolved must treat that as a
//! no-op; the scheduler itself knows nothing about requests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

struct Armed {
    ticket: u64,
    handle: JoinHandle<()>,
}

type TimerTable = Arc<Mutex<HashMap<String, Armed>>>;

/// Per-key one-shot timers on the tokio runtime.
pub struct EscalationScheduler {
    timers: TimerTable,
    next_ticket: AtomicU64,
}

impl EscalationScheduler {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Arms a timer for `key` that calls `on_fire` after `delay`.
    ///
    /// Replaces any timer already armed for `key`. Must be called from
    /// within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let owned_key = key.to_string();

        // the table stays locked until the entry is in place, so the task
        // can never observe the table before its own insert
        let mut table = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = {
                let mut table = lock(&timers);
                match table.get(&owned_key) {
                    Some(armed) if armed.ticket == ticket => {
                        table.remove(&owned_key);
                        true
                    }
                    _ => false,
                }
            };
            if claimed {
                trace!(key = %owned_key, ticket, "timer fired");
                on_fire().await;
            }
        });

        if let Some(previous) = table.insert(key.to_string(), Armed { ticket, handle }) {
            previous.handle.abort();
            debug!(key, "timer re-armed");
        } else {
            debug!(key, delay_ms = delay.as_millis() as u64, "timer armed");
        }
    }

    /// Disarms the timer for `key`. Returns false if none was armed or it
    /// already fired.
    pub fn cancel(&self, key: &str) -> bool {
        match lock(&self.timers).remove(key) {
            Some(armed) => {
                armed.handle.abort();
                debug!(key, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns true if a timer is armed and has not fired yet.
    pub fn is_scheduled(&self, key: &str) -> bool {
        lock(&self.timers).contains_key(key)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disarms every timer.
    pub fn shutdown(&self) {
        let drained: Vec<Armed> = lock(&self.timers).drain().map(|(_, armed)| armed).collect();
        for armed in &drained {
            armed.handle.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "scheduler shut down");
        }
    }
}

impl Default for EscalationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EscalationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EscalationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationScheduler")
            .field("armed", &self.len())
            .finish()
    }
}

fn lock(timers: &Mutex<HashMap<String, Armed>>) -> MutexGuard<'_, HashMap<String, Armed>> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    fn bump(count: &Arc<AtomicU32>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let scheduler = EscalationScheduler::new();
        let fired = counter();

        scheduler.schedule("req-1", Duration::from_secs(30), bump(&fired));
        assert!(scheduler.is_scheduled("req-1"));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("req-1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = EscalationScheduler::new();
        let fired = counter();

        scheduler.schedule("req-1", Duration::from_secs(10), bump(&fired));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(scheduler.cancel("req-1"));
        assert!(!scheduler.cancel("req-1"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_timer() {
        let scheduler = EscalationScheduler::new();
        let first = counter();
        let second = counter();

        scheduler.schedule("req-1", Duration::from_secs(5), bump(&first));
        scheduler.schedule("req-1", Duration::from_secs(20), bump(&second));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let scheduler = EscalationScheduler::new();
        let a = counter();
        let b = counter();

        scheduler.schedule("a", Duration::from_secs(5), bump(&a));
        scheduler.schedule("b", Duration::from_secs(5), bump(&b));
        scheduler.cancel("a");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disarms_everything() {
        let scheduler = EscalationScheduler::new();
        let fired = counter();
        for key in ["a", "b", "c"] {
            scheduler.schedule(key, Duration::from_secs(1), bump(&fired));
        }
        assert_eq!(scheduler.len(), 3);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }
}
