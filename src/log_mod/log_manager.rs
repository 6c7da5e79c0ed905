use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use log::{debug, warn};
use parking_lot::Mutex;

use super::log_record::{LogRecord, LogRecordType};
use super::segment::{SegmentIterator, SegmentManager};
use crate::common::{PagePos, Result, TransactionID, VaultError};

struct LogState {
    segments: SegmentManager,
    record_counts: HashMap<LogRecordType, u64>,
}

/// Write-ahead log front end. Appends are serialized; `flush` is the
/// durability point for everything appended before it.
pub struct LogManager {
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(log_dir: &Path, segment_capacity: usize) -> Result<Self> {
        let segments = SegmentManager::open(log_dir, segment_capacity)?;
        Ok(Self {
            state: Mutex::new(LogState {
                segments,
                record_counts: HashMap::new(),
            }),
        })
    }

    /// Appends `record`, pinning the segment it lands in for its transaction.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        let bytes = record.marshal();
        let mut state = self.state.lock();
        state.segments.append(record.tx_id(), &bytes)?;
        *state.record_counts.entry(record.record_type()).or_insert(0) += 1;
        Ok(())
    }

    pub fn log_snapshot(&self, tx_id: TransactionID, pos: PagePos, snapshot: &[u8]) -> Result<()> {
        self.log(&LogRecord::Update {
            tx_id,
            pos,
            snapshot: snapshot.to_vec(),
        })
    }

    pub fn log_commit(&self, tx_id: TransactionID) -> Result<()> {
        self.log(&LogRecord::Commit { tx_id })
    }

    pub fn log_abort(&self, tx_id: TransactionID) -> Result<()> {
        self.log(&LogRecord::Abort { tx_id })
    }

    pub fn flush(&self) -> Result<()> {
        self.state.lock().segments.flush()
    }

    /// Called once a transaction's effects no longer depend on the log.
    pub fn unpin(&self, tx_id: TransactionID) -> Result<()> {
        self.state.lock().segments.unpin(tx_id)
    }

    pub fn suspend_pruning(&self) {
        self.state.lock().segments.set_pruning_suspended(true);
    }

    pub fn resume_pruning(&self) -> Result<usize> {
        let mut state = self.state.lock();
        state.segments.set_pruning_suspended(false);
        state.segments.prune()
    }

    pub fn segment_ids(&self) -> Vec<u64> {
        self.state.lock().segments.segment_ids()
    }

    pub fn active_segment_id(&self) -> u64 {
        self.state.lock().segments.active_id()
    }

    pub fn is_segment_pinned(&self, id: u64) -> bool {
        self.state.lock().segments.is_pinned(id)
    }

    /// Every record currently in the log, oldest segment first.
    pub fn iter(&self) -> LogIterator {
        LogIterator {
            segments: self.state.lock().segments.iter(),
            current: None,
            failed: false,
        }
    }

    pub fn get_total_log_records(&self) -> u64 {
        self.state.lock().record_counts.values().sum()
    }

    pub fn get_total_log_records_of_type(&self, record_type: LogRecordType) -> u64 {
        *self
            .state
            .lock()
            .record_counts
            .get(&record_type)
            .unwrap_or(&0)
    }
}

/// Forward-only reader over the whole log. A torn record at the end of a
/// segment ends that segment; only an uncommitted transaction can be torn,
/// since commit forces the log first. Any other error ends the iteration.
pub struct LogIterator {
    segments: SegmentIterator,
    current: Option<(u64, BufReader<File>)>,
    failed: bool,
}

impl LogIterator {
    fn open_next(&mut self) -> Result<bool> {
        for (id, path) in self.segments.by_ref() {
            match File::open(&path) {
                Ok(file) => {
                    debug!("replaying log segment {}", id);
                    self.current = Some((id, BufReader::new(file)));
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("log segment {:?} disappeared before replay", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn advance(&mut self) -> Option<Result<LogRecord>> {
        loop {
            if self.current.is_none() {
                match self.open_next() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            let (id, reader) = self.current.as_mut()?;
            match LogRecord::read_from(reader) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => self.current = None,
                Err(VaultError::TruncatedLogRecord) => {
                    warn!("torn record at the tail of log segment {}, ignoring it", id);
                    self.current = None;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.advance();
        if let Some(Err(_)) = item {
            self.failed = true;
            self.current = None;
        }
        item
    }
}
