use std::fs::OpenOptions;
use std::io::Write;

use pagevault::{
    common::{PagePos, Result, TransactionID, VaultError},
    log_mod::{LogManager, LogRecord, LogRecordType},
};

// A 32 byte snapshot gives a 57 byte update record
const SNAPSHOT_LEN: usize = 32;
const SMALL_SEGMENT: usize = 64;

fn update(tx: u64, pos: u64, byte: u8) -> LogRecord {
    LogRecord::Update {
        tx_id: TransactionID(tx),
        pos: PagePos(pos),
        snapshot: vec![byte; SNAPSHOT_LEN],
    }
}

fn read_all(log: &LogManager) -> Result<Vec<LogRecord>> {
    log.iter().collect()
}

#[test]
fn test_log_manager_basic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), 4096)?;

    log.log_snapshot(TransactionID(1), PagePos(0), &[0xAA; 16])?;
    log.log_commit(TransactionID(1))?;
    log.log_abort(TransactionID(2))?;
    log.flush()?;

    assert_eq!(log.get_total_log_records(), 3);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::UpdateRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::CommitRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::AbortRecord), 1);

    let records = read_all(&log)?;
    assert_eq!(
        records,
        vec![
            LogRecord::Update {
                tx_id: TransactionID(1),
                pos: PagePos(0),
                snapshot: vec![0xAA; 16],
            },
            LogRecord::Commit { tx_id: TransactionID(1) },
            LogRecord::Abort { tx_id: TransactionID(2) },
        ]
    );
    Ok(())
}

#[test]
fn test_records_keep_order_across_segments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), SMALL_SEGMENT)?;

    // Nothing is unpinned, so every segment survives
    let written: Vec<_> = (1..=4).map(|tx| update(tx, tx * 4096, tx as u8)).collect();
    for record in &written {
        log.log(record)?;
    }
    log.flush()?;

    assert_eq!(log.segment_ids(), vec![0, 1, 2, 3]);
    assert_eq!(log.active_segment_id(), 3);
    assert_eq!(read_all(&log)?, written);
    Ok(())
}

#[test]
fn test_unpin_prunes_oldest_segments_first() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), SMALL_SEGMENT)?;

    log.log(&update(1, 0, 1))?; // segment 0
    log.log(&update(2, 0, 2))?; // segment 1
    log.log(&update(3, 0, 3))?; // segment 2, active
    assert!(log.is_segment_pinned(0));

    // Segment 0 is still pinned by tx 1, so segment 1 must stay too
    log.unpin(TransactionID(2))?;
    assert_eq!(log.segment_ids(), vec![0, 1, 2]);
    assert!(!log.is_segment_pinned(1));

    log.unpin(TransactionID(1))?;
    assert_eq!(log.segment_ids(), vec![2]);
    assert!(!dir.path().join("0").exists());
    assert!(!dir.path().join("1").exists());

    // The active segment is never pruned
    log.unpin(TransactionID(3))?;
    assert_eq!(log.segment_ids(), vec![2]);
    Ok(())
}

#[test]
fn test_suspended_pruning_keeps_segments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), SMALL_SEGMENT)?;

    log.log(&update(1, 0, 1))?;
    log.log(&update(2, 0, 2))?;

    log.suspend_pruning();
    log.unpin(TransactionID(1))?;
    assert_eq!(log.segment_ids(), vec![0, 1]);

    assert_eq!(log.resume_pruning()?, 1);
    assert_eq!(log.segment_ids(), vec![1]);
    Ok(())
}

#[test]
fn test_reopen_finds_existing_segments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let log = LogManager::new(dir.path(), SMALL_SEGMENT)?;
        log.log(&update(1, 0, 1))?;
        log.log(&update(1, 4096, 2))?;
        log.log_commit(TransactionID(1))?;
        log.flush()?;
    }

    let log = LogManager::new(dir.path(), SMALL_SEGMENT)?;
    assert_eq!(log.segment_ids(), vec![0, 1, 2]);
    assert_eq!(log.active_segment_id(), 2);
    assert_eq!(read_all(&log)?.len(), 3);
    // Counters only cover this process
    assert_eq!(log.get_total_log_records(), 0);
    Ok(())
}

#[test]
fn test_torn_tail_is_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), 4096)?;
    log.log(&update(1, 0, 1))?;
    log.log_commit(TransactionID(1))?;
    log.flush()?;

    let torn = update(2, 0, 2).marshal();
    let mut segment = OpenOptions::new()
        .append(true)
        .open(dir.path().join(log.active_segment_id().to_string()))?;
    segment.write_all(&torn[..torn.len() / 2])?;
    segment.sync_all()?;

    let records = read_all(&log)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1], LogRecord::Commit { tx_id: TransactionID(1) });
    Ok(())
}

#[test]
fn test_reopen_cuts_torn_tail_before_appending() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let segment_path = dir.path().join("0");
    let intact_len;
    {
        let log = LogManager::new(dir.path(), 4096)?;
        log.log(&update(1, 0, 1))?;
        log.log_commit(TransactionID(1))?;
        log.flush()?;
        intact_len = std::fs::metadata(&segment_path)?.len();
    }

    let torn = update(2, 0, 2).marshal();
    let mut segment = OpenOptions::new().append(true).open(&segment_path)?;
    segment.write_all(&torn[..torn.len() / 2])?;
    segment.sync_all()?;
    drop(segment);

    {
        let log = LogManager::new(dir.path(), 4096)?;
        assert_eq!(std::fs::metadata(&segment_path)?.len(), intact_len);
        log.log(&update(3, 4096, 3))?;
        log.log_commit(TransactionID(3))?;
        log.flush()?;
    }

    let log = LogManager::new(dir.path(), 4096)?;
    let records = read_all(&log)?;
    assert_eq!(
        records,
        vec![
            update(1, 0, 1),
            LogRecord::Commit { tx_id: TransactionID(1) },
            update(3, 4096, 3),
            LogRecord::Commit { tx_id: TransactionID(3) },
        ]
    );
    Ok(())
}

#[test]
fn test_corrupt_record_type_fails_iteration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = LogManager::new(dir.path(), 4096)?;
    log.log_commit(TransactionID(1))?;
    log.flush()?;

    let mut segment = OpenOptions::new()
        .append(true)
        .open(dir.path().join("0"))?;
    segment.write_all(&[0x7F; 9])?;
    segment.sync_all()?;

    let mut records = log.iter();
    assert!(matches!(records.next(), Some(Ok(LogRecord::Commit { .. }))));
    assert!(matches!(records.next(), Some(Err(VaultError::InvalidLogRecord(_)))));
    // Nothing after the first error is trusted
    assert!(records.next().is_none());
    assert!(records.next().is_none());
    Ok(())
}

#[test]
fn test_non_numeric_files_are_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("README"), b"not a segment")?;

    let log = LogManager::new(dir.path(), 4096)?;
    assert_eq!(log.segment_ids(), vec![0]);
    assert!(read_all(&log)?.is_empty());
    Ok(())
}
