use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::log_record::LogRecord;
use crate::common::{Result, TransactionID, VaultError};

/// One append-only WAL file, named by its numeric id.
pub struct Segment {
    id: u64,
    path: PathBuf,
    file: File,
    len: u64,
    /// Live transactions that wrote here and have not finished yet.
    pinned_by: HashSet<TransactionID>,
}

impl Segment {
    fn open(dir: &Path, id: u64) -> Result<Self> {
        let path = dir.join(id.to_string());
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file,
            len,
            pinned_by: HashSet::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Cuts a partial record off the end of the file so later appends start
    /// on a record boundary. Anything before the tear is left untouched.
    fn trim_torn_tail(&mut self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut valid_len = 0u64;
        loop {
            match LogRecord::read_from(&mut reader) {
                Ok(Some(record)) => valid_len += record.encoded_len() as u64,
                Ok(None) => return Ok(()),
                Err(VaultError::TruncatedLogRecord) => break,
                Err(e) => return Err(e),
            }
        }

        warn!(
            "truncating torn record in log segment {} at byte {} (was {})",
            self.id, valid_len, self.len
        );
        self.file.set_len(valid_len)?;
        self.file.sync_data()?;
        self.len = valid_len;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn remove(self) -> Result<()> {
        drop(self.file);
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Owns the segment files of the log directory. New records always go to the
/// active (newest) segment; older segments are deleted oldest first once no
/// live transaction pins them.
pub struct SegmentManager {
    dir: PathBuf,
    capacity: u64,
    segments: BTreeMap<u64, Segment>,
    active: u64,
    pruning_suspended: bool,
}

impl SegmentManager {
    pub fn open(dir: &Path, capacity: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut segments = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let id = match entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                Some(id) => id,
                None => continue,
            };
            segments.insert(id, Segment::open(dir, id)?);
        }

        if segments.is_empty() {
            segments.insert(0, Segment::open(dir, 0)?);
        }
        let active = segments.keys().next_back().copied().unwrap_or(0);
        // Only the newest segment is appended to, so only its tail can be torn.
        if let Some(segment) = segments.get_mut(&active) {
            segment.trim_torn_tail()?;
        }
        debug!(
            "opened {} log segment(s) in {:?}, active segment {}",
            segments.len(),
            dir,
            active
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            capacity: capacity as u64,
            segments,
            active,
            pruning_suspended: false,
        })
    }

    fn active_segment(&mut self) -> &mut Segment {
        self.segments
            .get_mut(&self.active)
            .expect("active log segment is always present")
    }

    /// Appends `bytes` to the active segment on behalf of `tx_id`, rolling to
    /// a new segment first if the record would overflow a non-empty one.
    pub fn append(&mut self, tx_id: TransactionID, bytes: &[u8]) -> Result<()> {
        let capacity = self.capacity;
        let active = self.active_segment();
        if !active.is_empty() && active.len() + bytes.len() as u64 > capacity {
            self.roll()?;
        }

        let active = self.active_segment();
        active.append(bytes)?;
        active.pinned_by.insert(tx_id);
        Ok(())
    }

    fn roll(&mut self) -> Result<()> {
        self.active_segment().sync()?;
        let next = self.active + 1;
        self.segments.insert(next, Segment::open(&self.dir, next)?);
        self.active = next;
        debug!("rolled log to segment {}", next);
        self.prune()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.active_segment().sync()
    }

    /// Releases every pin `tx_id` holds and prunes what that frees up.
    pub fn unpin(&mut self, tx_id: TransactionID) -> Result<()> {
        for segment in self.segments.values_mut() {
            segment.pinned_by.remove(&tx_id);
        }
        self.prune()?;
        Ok(())
    }

    /// Deletes unpinned segments from the oldest end, stopping at the first
    /// pinned one or the active one. Returns how many were removed.
    pub fn prune(&mut self) -> Result<usize> {
        if self.pruning_suspended {
            return Ok(0);
        }

        let mut removed = 0;
        while let Some(entry) = self.segments.first_entry() {
            let segment = entry.get();
            if segment.id == self.active || !segment.pinned_by.is_empty() {
                break;
            }
            let segment = entry.remove();
            debug!("pruning log segment {}", segment.id);
            segment.remove()?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn set_pruning_suspended(&mut self, suspended: bool) {
        self.pruning_suspended = suspended;
    }

    pub fn active_id(&self) -> u64 {
        self.active
    }

    pub fn segment_ids(&self) -> Vec<u64> {
        self.segments.keys().copied().collect()
    }

    pub fn is_pinned(&self, id: u64) -> bool {
        self.segments
            .get(&id)
            .map(|segment| !segment.pinned_by.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the current segments, oldest first.
    pub fn iter(&self) -> SegmentIterator {
        SegmentIterator {
            remaining: self
                .segments
                .values()
                .map(|segment| (segment.id, segment.path.clone()))
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }
}

/// Single-pass walk over segment files in id order.
pub struct SegmentIterator {
    remaining: std::vec::IntoIter<(u64, PathBuf)>,
}

impl Iterator for SegmentIterator {
    type Item = (u64, PathBuf);

    fn next(&mut self) -> Option<Self::Item> {
        self.remaining.next()
    }
}
