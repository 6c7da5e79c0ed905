//! Page-level lock table.
//!
//! Each locked page carries a single group [`Lock`]: the strongest mode
//! currently granted plus the number of holders. Waiters park on one
//! condition variable and retry whenever a release is broadcast, so there is
//! no FIFO fairness; a starved waiter gives up at the table's timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::common::{PagePos, Result, TransactionID, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    Shared,
    Exclusive,
    /// Intent to write: coexists with readers but not with another updater.
    Update,
}

impl LockMode {
    pub fn is_compatible(self, other: LockMode) -> bool {
        matches!(
            (self, other),
            (LockMode::Shared, LockMode::Shared)
                | (LockMode::Shared, LockMode::Update)
                | (LockMode::Update, LockMode::Shared)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    mode: LockMode,
    ref_count: usize,
    /// Transaction that claimed the upgrade slot (Update, then Exclusive).
    upgrader: Option<TransactionID>,
}

impl Lock {
    fn new(mode: LockMode) -> Self {
        Self {
            mode,
            ref_count: 1,
            upgrader: None,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

pub struct LockTable {
    locks: Mutex<HashMap<PagePos, Lock>>,
    released: Condvar,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    fn try_acquire(locks: &mut HashMap<PagePos, Lock>, key: PagePos, mode: LockMode) -> bool {
        match locks.get_mut(&key) {
            None => {
                locks.insert(key, Lock::new(mode));
                true
            }
            Some(lock) if lock.mode.is_compatible(mode) => {
                lock.ref_count += 1;
                if mode == LockMode::Update {
                    lock.mode = LockMode::Update;
                }
                true
            }
            Some(_) => false,
        }
    }

    /// Grants `mode` on `key` if it is compatible with what is already held.
    pub fn try_lock(&self, key: PagePos, mode: LockMode) -> bool {
        let mut locks = self.locks.lock();
        Self::try_acquire(&mut locks, key, mode)
    }

    /// Blocks until `mode` can be granted on `key`, or fails with
    /// [`VaultError::LockTimeout`] once the table's timeout elapses.
    pub fn lock(&self, key: PagePos, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut locks = self.locks.lock();

        loop {
            if Self::try_acquire(&mut locks, key, mode) {
                return Ok(());
            }
            if self.released.wait_until(&mut locks, deadline).timed_out() {
                if Self::try_acquire(&mut locks, key, mode) {
                    return Ok(());
                }
                debug!("lock {:?} on page {} timed out", mode, key);
                return Err(VaultError::LockTimeout(key));
            }
        }
    }

    /// Drops one shared or exclusive reference to `key`. Panics if `key` is
    /// not locked. A lock granted in `Update` mode by [`lock`](Self::lock) or
    /// [`try_lock`](Self::try_lock) is released with
    /// [`unlock_update`](Self::unlock_update).
    pub fn unlock(&self, key: PagePos) {
        let mut locks = self.locks.lock();
        let lock = locks
            .get_mut(&key)
            .unwrap_or_else(|| panic!("unlock of page {} which is not locked", key));

        lock.ref_count -= 1;
        if lock.ref_count == 0 {
            locks.remove(&key);
            self.released.notify_all();
        } else if lock.ref_count == 1 && lock.upgrader.is_some() {
            // The pending upgrader may now be the sole holder.
            self.released.notify_all();
        }
    }

    /// Releases the `Update` reference on `key` and hands the group back to
    /// its readers, so a later updater is not kept waiting for them.
    pub fn unlock_update(&self, key: PagePos) {
        let mut locks = self.locks.lock();
        let lock = locks
            .get_mut(&key)
            .unwrap_or_else(|| panic!("unlock of page {} which is not locked", key));
        if lock.mode != LockMode::Update || lock.upgrader.is_some() {
            panic!("page {} is not held in update mode", key);
        }

        lock.ref_count -= 1;
        if lock.ref_count == 0 {
            locks.remove(&key);
        } else {
            lock.mode = LockMode::Shared;
        }
        self.released.notify_all();
    }

    /// Turns the shared reference `owner` already holds on `key` into an
    /// exclusive one. Only one transaction may wait for an upgrade at a time;
    /// it holds the Update mode meanwhile so new readers are still admitted.
    pub fn upgrade_lock(&self, key: PagePos, owner: TransactionID) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut locks = self.locks.lock();

        loop {
            let lock = locks
                .get_mut(&key)
                .unwrap_or_else(|| panic!("upgrade of page {} which is not locked", key));

            match lock.mode {
                // The caller holds a reference, so an exclusive lock is its own.
                LockMode::Exclusive => return Ok(()),
                LockMode::Shared => {
                    lock.mode = LockMode::Update;
                    lock.upgrader = Some(owner);
                    continue;
                }
                LockMode::Update if lock.upgrader == Some(owner) && lock.ref_count == 1 => {
                    lock.mode = LockMode::Exclusive;
                    return Ok(());
                }
                LockMode::Update => {}
            }

            if self.released.wait_until(&mut locks, deadline).timed_out() {
                if let Some(lock) = locks.get_mut(&key) {
                    if lock.upgrader == Some(owner) {
                        lock.mode = LockMode::Shared;
                        lock.upgrader = None;
                        self.released.notify_all();
                    }
                }
                debug!("upgrade of page {} by {} timed out", key, owner);
                return Err(VaultError::LockTimeout(key));
            }
        }
    }

    /// Returns `key` to shared mode after an upgrade.
    pub fn downgrade_lock(&self, key: PagePos) {
        let mut locks = self.locks.lock();
        let lock = locks
            .get_mut(&key)
            .unwrap_or_else(|| panic!("downgrade of page {} which is not locked", key));

        if lock.mode != LockMode::Shared {
            lock.mode = LockMode::Shared;
            lock.upgrader = None;
            self.released.notify_all();
        }
    }

    pub fn get_lock(&self, key: PagePos) -> Option<Lock> {
        self.locks.lock().get(&key).cloned()
    }
}
