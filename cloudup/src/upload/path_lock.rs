use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per key. A key's entry leaves the table once nobody
/// holds or waits for it.
#[derive(Clone, Default)]
pub struct PathLocks {
    table: Arc<Mutex<LockTable>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> PathLockGuard {
        let entry = {
            let mut table = lock_table(&self.table);
            Arc::clone(table.entry(key.to_string()).or_default())
        };
        let guard = entry.lock_owned().await;
        PathLockGuard {
            key: key.to_string(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    pub fn held_keys(&self) -> usize {
        lock_table(&self.table).len()
    }
}

/// Releases the key when dropped, including on error paths.
pub struct PathLockGuard {
    key: String,
    table: Arc<Mutex<LockTable>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PathLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        self.guard.take();
        if let Some(entry) = table.get(&self.key)
            && Arc::strong_count(entry) == 1
        {
            table.remove(&self.key);
        }
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Throttle {
    interval: Duration,
    last: AsyncMutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: AsyncMutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
