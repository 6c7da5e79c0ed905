use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{PagePos, Result, VaultError};
use crate::storage::{Page, PageFormat, StorageManager};

pub type SlotId = usize;

/// How long a fetch parks before rescanning for a victim when every slot is
/// pinned. Unpins wake it earlier.
const VICTIM_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct BufferSlot {
    pos: Option<PagePos>,
    data: Vec<u8>,
    is_dirty: bool,
    pin_count: u32, // Reference count - can't evict while > 0
}

impl BufferSlot {
    pub fn new(page_size: usize) -> Self {
        Self {
            pos: None,
            data: vec![0; page_size],
            is_dirty: false,
            pin_count: 0,
        }
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) -> Result<()> {
        if self.pin_count == 0 {
            return Err(VaultError::Other(
                "Cannot unpin a page with pin count 0".to_string(),
            ));
        }
        self.pin_count -= 1;
        Ok(())
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    fn reset(&mut self) {
        self.pos = None;
        self.is_dirty = false;
        self.pin_count = 0;
    }
}

/// Page-table entry. `Reserved` is published while the loading fetch does its
/// I/O so that concurrent fetches of the same page wait for it instead of
/// loading a second copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotEntry {
    Reserved,
    Resident(SlotId),
}

struct PoolState {
    page_table: HashMap<PagePos, SlotEntry>,
    free_slots: Vec<SlotId>,
    /// Resident slots, least recently used at the front.
    lru: VecDeque<SlotId>,
}

impl PoolState {
    fn touch(&mut self, slot_id: SlotId) {
        if let Some(idx) = self.lru.iter().position(|&id| id == slot_id) {
            self.lru.remove(idx);
        }
        self.lru.push_back(slot_id);
    }
}

/// Fixed-capacity page cache in front of the [`StorageManager`].
///
/// Lock order is pool state, then slot. Dirty slots are never chosen as
/// victims, so uncommitted bytes only reach the data file through an explicit
/// [`flush`](Self::flush).
pub struct BufferPoolManager {
    storage: Arc<StorageManager>,
    format: PageFormat,
    slots: Vec<Mutex<BufferSlot>>,
    state: Mutex<PoolState>,
    changed: Condvar,
}

impl BufferPoolManager {
    pub fn new(
        storage: Arc<StorageManager>,
        capacity: usize,
        format: PageFormat,
    ) -> Result<Self> {
        let page_size = storage.page_size();
        if page_size < format.min_page_size() {
            return Err(VaultError::InvalidConfig(format!(
                "page size {} is below the {:?} minimum of {}",
                page_size,
                format,
                format.min_page_size()
            )));
        }
        let slots = (0..capacity)
            .map(|_| Mutex::new(BufferSlot::new(page_size)))
            .collect();

        Ok(Self {
            storage,
            format,
            slots,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(capacity),
                free_slots: (0..capacity).rev().collect(),
                lru: VecDeque::with_capacity(capacity),
            }),
            changed: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get_page_size(&self) -> usize {
        self.storage.page_size()
    }

    pub fn page_format(&self) -> PageFormat {
        self.format
    }

    /// Makes `pos` resident, loading it from storage on a miss.
    pub fn fetch(&self, pos: PagePos) -> Result<()> {
        self.fetch_slot(pos, false).map(|_| ())
    }

    /// Pins `pos`, faulting it back in if it was evicted since it was fetched.
    pub fn pin(&self, pos: PagePos) -> Result<()> {
        self.fetch_slot(pos, true).map(|_| ())
    }

    pub fn unpin(&self, pos: PagePos) -> Result<()> {
        let mut slot = self
            .lock_resident(pos)
            .ok_or(VaultError::PageNotResident(pos))?;
        slot.unpin()?;
        if slot.pin_count() == 0 {
            drop(slot);
            self.changed.notify_all();
        }
        Ok(())
    }

    fn fetch_slot(&self, pos: PagePos, pin: bool) -> Result<SlotId> {
        let mut state = self.state.lock();
        loop {
            match state.page_table.get(&pos).copied() {
                Some(SlotEntry::Resident(slot_id)) => {
                    if pin {
                        self.slots[slot_id].lock().pin();
                    }
                    state.touch(slot_id);
                    return Ok(slot_id);
                }
                Some(SlotEntry::Reserved) => self.changed.wait(&mut state),
                None => break,
            }
        }

        state.page_table.insert(pos, SlotEntry::Reserved);
        let slot_id = self.claim_slot(&mut state, pos);
        drop(state);

        // The slot is unreachable from the page table and the LRU list, so
        // nobody else touches it during the read.
        let loaded = {
            let mut slot = self.slots[slot_id].lock();
            slot.reset();
            let result = self.storage.read_block(pos, slot.get_data_mut());
            if result.is_ok() {
                slot.pos = Some(pos);
                if pin {
                    slot.pin();
                }
            }
            result
        };

        let mut state = self.state.lock();
        let outcome = match loaded {
            Ok(()) => {
                state.page_table.insert(pos, SlotEntry::Resident(slot_id));
                state.lru.push_back(slot_id);
                trace!("loaded page {} into slot {}", pos, slot_id);
                Ok(slot_id)
            }
            Err(e) => {
                state.page_table.remove(&pos);
                state.free_slots.push(slot_id);
                Err(e)
            }
        };
        drop(state);
        self.changed.notify_all();
        outcome
    }

    fn claim_slot(&self, state: &mut MutexGuard<'_, PoolState>, pos: PagePos) -> SlotId {
        let mut warned = false;
        loop {
            if let Some(slot_id) = state.free_slots.pop() {
                return slot_id;
            }
            if let Some(slot_id) = self.pick_victim(state) {
                return slot_id;
            }
            if !warned {
                warn!(
                    "buffer pool exhausted: all {} slots pinned or dirty, fetch of {} waits",
                    self.slots.len(),
                    pos
                );
                warned = true;
            }
            self.changed.wait_for(state, VICTIM_RETRY_INTERVAL);
        }
    }

    /// Least recently used slot that is unpinned and clean. Slots whose lock
    /// is busy are skipped rather than waited on.
    fn pick_victim(&self, state: &mut PoolState) -> Option<SlotId> {
        let idx = state.lru.iter().position(|&slot_id| {
            self.slots[slot_id]
                .try_lock()
                .map(|slot| slot.pin_count() == 0 && !slot.is_dirty())
                .unwrap_or(false)
        })?;
        let slot_id = state.lru.remove(idx)?;

        let evicted = self.slots[slot_id].lock().pos.take();
        if let Some(old_pos) = evicted {
            state.page_table.remove(&old_pos);
            trace!("evicted page {} from slot {}", old_pos, slot_id);
        }
        Some(slot_id)
    }

    fn lock_resident(&self, pos: PagePos) -> Option<MutexGuard<'_, BufferSlot>> {
        let state = self.state.lock();
        let slot_id = match state.page_table.get(&pos) {
            Some(SlotEntry::Resident(slot_id)) => *slot_id,
            _ => return None,
        };
        let slot = self.slots[slot_id].lock();
        drop(state);
        Some(slot)
    }

    pub fn read_page_at_pos(&self, pos: PagePos) -> Result<Page> {
        let slot = self
            .lock_resident(pos)
            .ok_or(VaultError::PageNotResident(pos))?;
        Page::unmarshal(slot.get_data(), self.format).map_err(|e| {
            if let VaultError::ChecksumMismatch { .. } = e {
                warn!("page {} failed checksum verification", pos);
            }
            e
        })
    }

    pub fn write_page_at_pos(&self, page: &Page, pos: PagePos) -> Result<()> {
        let bytes = page.marshal()?;
        let page_size = self.get_page_size();
        if bytes.len() != page_size {
            return Err(VaultError::PageSizeExceeded(bytes.len(), page_size));
        }

        let mut slot = self
            .lock_resident(pos)
            .ok_or(VaultError::PageNotResident(pos))?;
        slot.get_data_mut().copy_from_slice(&bytes);
        slot.set_dirty(true);
        Ok(())
    }

    pub fn read_page_if_dirty(&self, pos: PagePos) -> Result<Option<Page>> {
        match self.lock_resident(pos) {
            Some(slot) if slot.is_dirty() => {
                Page::unmarshal(slot.get_data(), self.format).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Writes `pos` back to storage if it is dirty. Does not fsync.
    pub fn flush(&self, pos: PagePos) -> Result<()> {
        if let Some(mut slot) = self.lock_resident(pos) {
            if slot.is_dirty() {
                self.storage.write_block(pos, slot.get_data())?;
                slot.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Drops `pos` from the pool without writing it back. A pinned page is
    /// left alone; returns whether the page is no longer resident.
    pub fn deallocate(&self, pos: PagePos) -> bool {
        let mut state = self.state.lock();
        let slot_id = match state.page_table.get(&pos) {
            Some(SlotEntry::Resident(slot_id)) => *slot_id,
            Some(SlotEntry::Reserved) => return false,
            None => return true,
        };

        {
            let mut slot = self.slots[slot_id].lock();
            if slot.pin_count() > 0 {
                trace!("deallocate of pinned page {} skipped", pos);
                return false;
            }
            slot.reset();
        }

        state.page_table.remove(&pos);
        if let Some(idx) = state.lru.iter().position(|&id| id == slot_id) {
            state.lru.remove(idx);
        }
        state.free_slots.push(slot_id);
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Replaces a dirty slot's bytes with the stored image of `pos`.
    pub fn revert(&self, pos: PagePos) -> Result<()> {
        if let Some(mut slot) = self.lock_resident(pos) {
            if slot.is_dirty() {
                self.storage.read_block(pos, slot.get_data_mut())?;
                slot.set_dirty(false);
            }
        }
        Ok(())
    }

    pub fn is_resident(&self, pos: PagePos) -> bool {
        matches!(
            self.state.lock().page_table.get(&pos),
            Some(SlotEntry::Resident(_))
        )
    }

    pub fn pin_count(&self, pos: PagePos) -> Option<u32> {
        self.lock_resident(pos).map(|slot| slot.pin_count())
    }

    pub fn is_dirty(&self, pos: PagePos) -> bool {
        self.lock_resident(pos)
            .map(|slot| slot.is_dirty())
            .unwrap_or(false)
    }
}
