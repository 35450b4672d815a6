//! Per-account mutual exclusion for balance mutations.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::AccountId;

/// One async mutex per account that currently has a mutation in flight or queued.
/// Entries are dropped again once nobody holds or waits on them.
#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other mutation on `account_id` is in flight.
    pub async fn acquire(&self, account_id: AccountId) -> AccountGuard<'_> {
        // Clone out of the map so the shard lock is released before awaiting
        let mutex = self.locks.entry(account_id).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        AccountGuard {
            locks: self,
            account_id,
            guard: Some(guard),
        }
    }

    /// Number of accounts with a live lock entry.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct AccountGuard<'a> {
    locks: &'a AccountLocks,
    account_id: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds the only remaining reference when nobody is waiting
        self.locks
            .locks
            .remove_if(&self.account_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
