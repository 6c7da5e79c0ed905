use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use log::{trace, warn};

use super::transaction_manager::TxResources;
use crate::common::{PagePos, Result, TransactionID};
use crate::lock::LockMode;
use crate::storage::Page;

/// Lock discipline chosen when a transaction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxLockMode {
    /// Shared page locks, upgraded around each write and handed back by
    /// [`Transaction::downgrade_locks`]. Reads may be non-repeatable.
    Shared,
    /// Exclusive page locks held until commit or abort.
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Processing,
    Committed,
    Aborted,
}

pub struct Transaction {
    pub id: TransactionID,
    lock_mode: TxLockMode,
    state: TxState,
    locked_pages: BTreeSet<PagePos>,  // Pages we hold a lock and a pin on
    written_pages: BTreeSet<PagePos>, // Subset of locked_pages we wrote to
    upgraded_pages: HashSet<PagePos>,
    /// Set for transactions rebuilt from the log. Replay runs alone, and
    /// transactions that shared a page in `Shared` mode must not block each
    /// other, so these skip the lock table.
    replaying: bool,
    resources: Arc<TxResources>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionID, lock_mode: TxLockMode, resources: Arc<TxResources>) -> Self {
        Self::build(id, lock_mode, false, resources)
    }

    pub(crate) fn replayed(
        id: TransactionID,
        lock_mode: TxLockMode,
        resources: Arc<TxResources>,
    ) -> Self {
        Self::build(id, lock_mode, true, resources)
    }

    fn build(
        id: TransactionID,
        lock_mode: TxLockMode,
        replaying: bool,
        resources: Arc<TxResources>,
    ) -> Self {
        Self {
            id,
            lock_mode,
            state: TxState::Processing,
            locked_pages: BTreeSet::new(),
            written_pages: BTreeSet::new(),
            upgraded_pages: HashSet::new(),
            replaying,
            resources,
        }
    }

    pub fn id(&self) -> TransactionID {
        self.id
    }

    pub fn lock_mode(&self) -> TxLockMode {
        self.lock_mode
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn locked_pages(&self) -> impl Iterator<Item = PagePos> + '_ {
        self.locked_pages.iter().copied()
    }

    fn assert_processing(&self) {
        if self.state != TxState::Processing {
            panic!("{} used after it was {:?}", self.id, self.state);
        }
    }

    /// Locks and pins `pos` on first touch. Later touches only upgrade the
    /// lock when a `Shared` transaction is about to write.
    fn fetch_and_lock_page(&mut self, pos: PagePos, for_write: bool) -> Result<()> {
        self.assert_processing();
        let res = &self.resources;

        if !self.locked_pages.contains(&pos) {
            let mode = match self.lock_mode {
                TxLockMode::Shared => LockMode::Shared,
                TxLockMode::Exclusive => LockMode::Exclusive,
            };
            if !self.replaying {
                res.locks.lock(pos, mode)?;
            }
            if let Err(e) = res.buffer.pin(pos) {
                if !self.replaying {
                    res.locks.unlock(pos);
                }
                return Err(e);
            }
            self.locked_pages.insert(pos);
        }

        if for_write && self.lock_mode == TxLockMode::Shared {
            res.locks.upgrade_lock(pos, self.id)?;
            self.upgraded_pages.insert(pos);
        }
        Ok(())
    }

    pub fn allocate_page(&mut self) -> Page {
        self.assert_processing();
        let buffer = &self.resources.buffer;
        Page::new(buffer.get_page_size(), buffer.page_format())
    }

    pub fn read_page_at_pos(&mut self, pos: PagePos) -> Result<Page> {
        self.fetch_and_lock_page(pos, false)?;
        self.resources.buffer.read_page_at_pos(pos)
    }

    pub fn write_page_at_pos(&mut self, page: &Page, pos: PagePos) -> Result<()> {
        self.fetch_and_lock_page(pos, true)?;
        self.resources.buffer.write_page_at_pos(page, pos)?;
        self.written_pages.insert(pos);
        Ok(())
    }

    /// Appends a fresh page to the data file and writes `page` there.
    pub fn write_page(&mut self, page: &Page) -> Result<PagePos> {
        self.assert_processing();
        let pos = self.resources.storage.extend()?;
        self.write_page_at_pos(page, pos)?;
        Ok(pos)
    }

    pub fn no_data_found(&self) -> Result<bool> {
        self.resources.storage.empty()
    }

    pub fn downgrade_locks(&mut self) {
        self.assert_processing();
        if self.lock_mode != TxLockMode::Shared {
            return;
        }
        for pos in self.upgraded_pages.drain() {
            self.resources.locks.downgrade_lock(pos);
        }
    }

    /// Logs a snapshot of every page this transaction dirtied, forces the log,
    /// and only then applies the pages to the data file.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_processing();
        let res = &self.resources;

        for &pos in &self.written_pages {
            if let Some(page) = res.buffer.read_page_if_dirty(pos)? {
                res.log.log_snapshot(self.id, pos, &page.marshal()?)?;
            }
        }
        res.log.log_commit(self.id)?;
        res.log.flush()?;

        self.commit_no_log()
    }

    /// Second half of commit: write back, release pins and locks, and let the
    /// log forget this transaction. Recovery calls it directly when it
    /// replays a commit record.
    pub fn commit_no_log(&mut self) -> Result<()> {
        self.assert_processing();
        let res = &self.resources;

        for &pos in &self.written_pages {
            res.buffer.flush(pos)?;
        }
        for &pos in &self.locked_pages {
            res.buffer.unpin(pos)?;
            self.release_lock(pos);
        }
        res.storage.flush()?;
        res.log.unpin(self.id)?;

        self.finish(TxState::Committed);
        Ok(())
    }

    /// Drops every change this transaction made. Nothing is logged.
    pub fn abort(&mut self) -> Result<()> {
        self.abort_no_log()
    }

    pub fn abort_no_log(&mut self) -> Result<()> {
        self.assert_processing();
        let res = &self.resources;

        for &pos in &self.locked_pages {
            res.buffer.unpin(pos)?;
            let released = res.buffer.deallocate(pos);
            if !released && self.written_pages.contains(&pos) {
                // Another transaction still pins the page; undo our bytes in place.
                res.buffer.revert(pos)?;
            }
            self.release_lock(pos);
        }
        res.log.unpin(self.id)?;

        self.finish(TxState::Aborted);
        Ok(())
    }

    /// Abort that leaves an abort record in the log, so a later replay of the
    /// same log reaches the same outcome.
    pub fn abort_with_log(&mut self) -> Result<()> {
        self.assert_processing();
        self.resources.log.log_abort(self.id)?;
        self.resources.log.flush()?;
        self.abort_no_log()
    }

    fn release_lock(&self, pos: PagePos) {
        if !self.replaying {
            self.resources.locks.unlock(pos);
        }
    }

    fn finish(&mut self, state: TxState) {
        trace!(
            "{} {:?} after touching {} page(s)",
            self.id,
            state,
            self.locked_pages.len()
        );
        self.locked_pages.clear();
        self.written_pages.clear();
        self.upgraded_pages.clear();
        self.state = state;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Processing && !std::thread::panicking() {
            if let Err(e) = self.abort() {
                warn!("abort of dropped {} failed: {}", self.id, e);
            }
        }
    }
}
