use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;

use super::transaction::{Transaction, TxLockMode};
use crate::buffer::BufferPoolManager;
use crate::common::TransactionID;
use crate::lock::LockTable;
use crate::log_mod::LogManager;
use crate::storage::StorageManager;

/// Kernel components every transaction works through.
pub(crate) struct TxResources {
    pub(crate) storage: Arc<StorageManager>,
    pub(crate) buffer: Arc<BufferPoolManager>,
    pub(crate) locks: Arc<LockTable>,
    pub(crate) log: Arc<LogManager>,
}

pub struct TransactionManager {
    /// Last id handed out.
    last_tx_id: AtomicU64,
    resources: Arc<TxResources>,
}

impl TransactionManager {
    pub fn new(
        storage: Arc<StorageManager>,
        buffer: Arc<BufferPoolManager>,
        locks: Arc<LockTable>,
        log: Arc<LogManager>,
    ) -> Self {
        Self {
            last_tx_id: AtomicU64::new(0),
            resources: Arc::new(TxResources {
                storage,
                buffer,
                locks,
                log,
            }),
        }
    }

    pub fn init_tx(&self, lock_mode: TxLockMode) -> Transaction {
        let id = TransactionID(self.last_tx_id.fetch_add(1, Ordering::SeqCst) + 1);
        trace!("starting {} in {:?} mode", id, lock_mode);
        Transaction::new(id, lock_mode, Arc::clone(&self.resources))
    }

    /// Re-materializes a transaction that already has an id in the log.
    /// Used by recovery only; does not advance the id counter and takes no
    /// page locks.
    pub fn init_tx_with_id(&self, id: TransactionID, lock_mode: TxLockMode) -> Transaction {
        Transaction::replayed(id, lock_mode, Arc::clone(&self.resources))
    }

    /// Makes `max_seen` the last issued id so new transactions never reuse a
    /// recovered one.
    pub fn reset_tx_id(&self, max_seen: TransactionID) {
        self.last_tx_id.store(max_seen.0, Ordering::SeqCst);
    }

    pub fn last_tx_id(&self) -> TransactionID {
        TransactionID(self.last_tx_id.load(Ordering::SeqCst))
    }

    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.resources.storage
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.resources.buffer
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.resources.locks
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.resources.log
    }
}
