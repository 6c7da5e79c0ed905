use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::transaction::{Transaction, TxState};
use crate::common::{PagePos, Result, TransactionID};
use crate::storage::{Page, PageFormat};

/// What index and record codecs need from a transaction.
///
/// Pages returned by a transaction must not be kept past its commit or abort.
pub trait Tx {
    fn id(&self) -> TransactionID;
    /// A scratch page with no position yet.
    fn allocate_page(&mut self) -> Page;
    fn read_page_at_pos(&mut self, pos: PagePos) -> Result<Page>;
    fn write_page_at_pos(&mut self, page: &Page, pos: PagePos) -> Result<()>;
    fn write_page(&mut self, page: &Page) -> Result<PagePos>;
    /// True iff the underlying storage holds no pages at all.
    fn no_data_found(&self) -> Result<bool>;
    fn downgrade_locks(&mut self);
    fn commit(&mut self) -> Result<()>;
    fn abort(&mut self) -> Result<()>;
}

impl Tx for Transaction {
    fn id(&self) -> TransactionID {
        Transaction::id(self)
    }

    fn allocate_page(&mut self) -> Page {
        Transaction::allocate_page(self)
    }

    fn read_page_at_pos(&mut self, pos: PagePos) -> Result<Page> {
        Transaction::read_page_at_pos(self, pos)
    }

    fn write_page_at_pos(&mut self, page: &Page, pos: PagePos) -> Result<()> {
        Transaction::write_page_at_pos(self, page, pos)
    }

    fn write_page(&mut self, page: &Page) -> Result<PagePos> {
        Transaction::write_page(self, page)
    }

    fn no_data_found(&self) -> Result<bool> {
        Transaction::no_data_found(self)
    }

    fn downgrade_locks(&mut self) {
        Transaction::downgrade_locks(self)
    }

    fn commit(&mut self) -> Result<()> {
        Transaction::commit(self)
    }

    fn abort(&mut self) -> Result<()> {
        Transaction::abort(self)
    }
}

/// Shared page map behind [`MemoryTx`]. No locking, logging or durability:
/// each transaction stages its writes and publishes them on commit.
#[derive(Clone)]
pub struct MemoryStore {
    pages: Arc<Mutex<BTreeMap<PagePos, Page>>>,
    page_size: usize,
    last_tx_id: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            pages: Arc::new(Mutex::new(BTreeMap::new())),
            page_size,
            last_tx_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn begin(&self) -> MemoryTx {
        MemoryTx {
            id: TransactionID(self.last_tx_id.fetch_add(1, Ordering::SeqCst) + 1),
            store: self.clone(),
            staged: BTreeMap::new(),
            state: TxState::Processing,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

pub struct MemoryTx {
    id: TransactionID,
    store: MemoryStore,
    staged: BTreeMap<PagePos, Page>,
    state: TxState,
}

impl MemoryTx {
    pub fn state(&self) -> TxState {
        self.state
    }

    fn assert_processing(&self) {
        if self.state != TxState::Processing {
            panic!("{} used after it was {:?}", self.id, self.state);
        }
    }

    fn blank_page(&self) -> Page {
        Page::new(self.store.page_size, PageFormat::Plain)
    }
}

impl Tx for MemoryTx {
    fn id(&self) -> TransactionID {
        self.id
    }

    fn allocate_page(&mut self) -> Page {
        self.assert_processing();
        self.blank_page()
    }

    fn read_page_at_pos(&mut self, pos: PagePos) -> Result<Page> {
        self.assert_processing();
        if let Some(page) = self.staged.get(&pos) {
            return Ok(page.clone());
        }
        let committed = self.store.pages.lock().get(&pos).cloned();
        Ok(committed.unwrap_or_else(|| self.blank_page()))
    }

    fn write_page_at_pos(&mut self, page: &Page, pos: PagePos) -> Result<()> {
        self.assert_processing();
        self.staged.insert(pos, page.clone());
        Ok(())
    }

    fn write_page(&mut self, page: &Page) -> Result<PagePos> {
        self.assert_processing();
        let page_size = self.store.page_size as u64;
        let committed_end = self
            .store
            .pages
            .lock()
            .keys()
            .next_back()
            .map(|pos| pos.0 + page_size)
            .unwrap_or(0);
        let staged_end = self
            .staged
            .keys()
            .next_back()
            .map(|pos| pos.0 + page_size)
            .unwrap_or(0);

        let pos = PagePos(committed_end.max(staged_end));
        self.staged.insert(pos, page.clone());
        Ok(pos)
    }

    fn no_data_found(&self) -> Result<bool> {
        Ok(self.store.pages.lock().is_empty())
    }

    fn downgrade_locks(&mut self) {}

    fn commit(&mut self) -> Result<()> {
        self.assert_processing();
        self.store.pages.lock().append(&mut self.staged);
        self.state = TxState::Committed;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.assert_processing();
        self.staged.clear();
        self.state = TxState::Aborted;
        Ok(())
    }
}
