//! Per-key mutual exclusion for engine transitions.
//!
//! Every read-modify-persist sequence on a request or item id runs while
//! holding that id's shard lock, so a human decision and an escalation
//! timer firing at the same instant resolve to exactly one outcome.
//! Distinct ids that hash to the same shard are serialized with each
//! other as well; that only costs throughput.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

/// A fixed set of async mutexes indexed by key hash.
///
/// Never acquire two keys at once: shards are not ordered, so nested
/// acquisition can deadlock.
#[derive(Debug)]
pub struct ShardedLocks {
    shards: Vec<Mutex<()>>,
}

impl ShardedLocks {
    /// Creates `shards` locks (at least one).
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)].lock().await
    }

    /// Shard index for a key.
    pub fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for ShardedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_shard_is_stable() {
        let locks = ShardedLocks::new(8);
        assert_eq!(locks.shard_of("req-1"), locks.shard_of("req-1"));
        assert!(locks.shard_of("req-1") < 8);
    }

    #[test]
    fn test_zero_shards_rounds_up() {
        let locks = ShardedLocks::new(0);
        assert_eq!(locks.shard_count(), 1);
        assert_eq!(locks.shard_of("anything"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(ShardedLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("req-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
