//! Per-job writer locks.
//!
//! Each job id maps to an async mutex so only one transition is in flight per
//! job inside this process. The map is a bounded LRU; the version check in the
//! repository still guards writes from other processes.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

pub struct JobLocks {
    locks: Mutex<LruCache<Uuid, Arc<AsyncMutex<()>>>>,
}

impl JobLocks {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            locks: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(key);
        lock.lock_owned().await
    }

    fn lock_for(&self, key: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(lock) = locks.get(&key) {
            return Arc::clone(lock);
        }

        let lock = Arc::new(AsyncMutex::new(()));
        locks.put(key, Arc::clone(&lock));
        lock
    }
}
