use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per account id. Balance mutations for an account run while
/// holding its guard, so concurrent events cannot overwrite each other's
/// balance update.
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub async fn lock(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let mutex = self.inner.entry(account_id).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drops the mutexes of accounts nobody holds or waits on.
    pub fn purge_idle(&self) {
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
