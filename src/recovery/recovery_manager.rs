use std::collections::HashMap;

use log::{debug, info};

use crate::common::{Result, TransactionID};
use crate::log_mod::LogRecord;
use crate::storage::Page;
use crate::transaction::{Transaction, TransactionManager, TxLockMode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub records_replayed: u64,
    pub committed: u64,
    /// Transactions that ended with an abort record.
    pub aborted: u64,
    /// Transactions with no terminal record, aborted at the end of replay.
    pub rolled_back: u64,
    pub max_tx_id: TransactionID,
}

/// Redo-only restart. Pages of uncommitted transactions never reach the data
/// file, so reapplying committed snapshots in log order is sufficient.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Replays the whole log through `tx_manager` and leaves the data file
    /// consistent. Must run before any other transaction starts.
    pub fn roll_forward(tx_manager: &TransactionManager) -> Result<RecoveryReport> {
        let log = tx_manager.log_manager();
        log.suspend_pruning();
        // On failure pruning stays off: segments are not pinned after a
        // restart, and their records may not be in the data file yet.
        let report = Self::replay(tx_manager)?;
        let pruned = log.resume_pruning()?;

        info!(
            "recovery replayed {} record(s): {} committed, {} aborted, {} rolled back; pruned {} segment(s)",
            report.records_replayed, report.committed, report.aborted, report.rolled_back, pruned
        );
        Ok(report)
    }

    fn replay(tx_manager: &TransactionManager) -> Result<RecoveryReport> {
        let buffer = tx_manager.buffer_pool();
        let mut report = RecoveryReport::default();
        let mut in_flight: HashMap<TransactionID, Transaction> = HashMap::new();

        for record in tx_manager.log_manager().iter() {
            let record = record?;
            let tx_id = record.tx_id();
            report.records_replayed += 1;
            report.max_tx_id = report.max_tx_id.max(tx_id);

            match record {
                LogRecord::Update { pos, snapshot, .. } => {
                    let tx = in_flight.entry(tx_id).or_insert_with(|| {
                        tx_manager.init_tx_with_id(tx_id, TxLockMode::Exclusive)
                    });
                    let page = Page::unmarshal(&snapshot, buffer.page_format())?;
                    tx.write_page_at_pos(&page, pos)?;
                    debug!("redo {} on page {}", tx_id, pos);
                }
                LogRecord::Commit { .. } => {
                    if let Some(mut tx) = in_flight.remove(&tx_id) {
                        tx.commit_no_log()?;
                    }
                    report.committed += 1;
                }
                LogRecord::Abort { .. } => {
                    if let Some(mut tx) = in_flight.remove(&tx_id) {
                        tx.abort_no_log()?;
                    }
                    report.aborted += 1;
                }
            }
        }

        let mut unfinished: Vec<_> = in_flight.into_iter().collect();
        unfinished.sort_by_key(|(id, _)| *id);
        for (tx_id, mut tx) in unfinished {
            debug!("rolling back unfinished {}", tx_id);
            tx.abort_with_log()?;
            report.rolled_back += 1;
        }

        tx_manager.reset_tx_id(report.max_tx_id.max(tx_manager.last_tx_id()));
        Ok(report)
    }
}
