use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pagevault::{
    common::{PagePos, Result, VaultError},
    storage::{Page, PageFormat},
    Database, DatabaseConfig, TxLockMode,
};

fn small_config() -> DatabaseConfig {
    DatabaseConfig::default()
        .with_page_size(256)
        .with_buffer_pool_size(8)
        .with_segment_capacity(2048)
        .with_lock_timeout(Duration::from_millis(500))
}

fn page_with(config: &DatabaseConfig, byte: u8) -> Page {
    let mut page = Page::new(config.page_size, config.page_format);
    page.payload_mut().fill(byte);
    page
}

#[test]
fn test_committed_page_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config();

    {
        let db = Database::open(dir.path(), config.clone())?;
        let mut txn = db.begin(TxLockMode::Exclusive);
        txn.write_page_at_pos(&page_with(&config, 0xAA), PagePos(0))?;
        txn.commit()?;
        db.close()?;
    }

    let db = Database::open(dir.path(), config.clone())?;
    let mut txn = db.begin(TxLockMode::Exclusive);
    assert_eq!(txn.read_page_at_pos(PagePos(0))?, page_with(&config, 0xAA));
    txn.commit()?;

    assert!(db.files().get_data_file_path().exists());
    Ok(())
}

#[test]
fn test_checksummed_pages_detect_corruption() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config().with_page_format(PageFormat::Checksummed);
    let pos;

    {
        let db = Database::open(dir.path(), config.clone())?;
        let mut txn = db.begin(TxLockMode::Exclusive);
        pos = txn.write_page(&page_with(&config, 0x42))?;
        txn.commit()?;
        db.close()?;
    }

    // Flip one payload byte on disk
    let data_path = dir.path().join("data").join("pages.db");
    let mut bytes = std::fs::read(&data_path)?;
    bytes[pos.0 as usize + 20] ^= 0xFF;
    std::fs::write(&data_path, &bytes)?;
    // Otherwise replay would rewrite the page from its logged snapshot
    std::fs::remove_dir_all(dir.path().join("log"))?;

    let db = Database::open(dir.path(), config)?;
    let mut txn = db.begin(TxLockMode::Shared);
    let err = txn.read_page_at_pos(pos).unwrap_err();
    assert!(matches!(err, VaultError::ChecksumMismatch { .. }));
    assert!(err.is_recoverable());
    txn.abort()?;
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::default().with_buffer_pool_size(0);
    assert!(matches!(
        Database::open(dir.path(), config),
        Err(VaultError::InvalidConfig(_))
    ));
}

#[test]
fn test_concurrent_writers_on_distinct_pages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config();
    let db = Arc::new(Database::open(dir.path(), config.clone())?);

    let handles: Vec<_> = (0..4u8)
        .map(|n| {
            let db = Arc::clone(&db);
            let page = page_with(&config, n + 1);
            thread::spawn(move || -> Result<()> {
                let pos = PagePos(n as u64 * 256);
                let mut txn = db.begin(TxLockMode::Exclusive);
                txn.write_page_at_pos(&page, pos)?;
                txn.commit()
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked")?;
    }

    let mut reader = db.begin(TxLockMode::Shared);
    for n in 0..4u8 {
        let page = reader.read_page_at_pos(PagePos(n as u64 * 256))?;
        assert_eq!(page, page_with(&config, n + 1));
    }
    reader.commit()?;
    Ok(())
}

#[test]
fn test_counter_increments_serialize() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config().with_lock_timeout(Duration::from_secs(10));
    let db = Arc::new(Database::open(dir.path(), config)?);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<()> {
                for _ in 0..10 {
                    let mut txn = db.begin(TxLockMode::Exclusive);
                    let mut page = txn.read_page_at_pos(PagePos(0))?;
                    page.set_num_records(page.num_records() + 1);
                    txn.write_page_at_pos(&page, PagePos(0))?;
                    txn.commit()?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    let mut txn = db.begin(TxLockMode::Exclusive);
    assert_eq!(txn.read_page_at_pos(PagePos(0))?.num_records(), 40);
    txn.commit()?;
    Ok(())
}

#[test]
fn test_recovery_report_on_fresh_database() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), small_config())?;

    let report = db.recovery_report();
    assert_eq!(report.records_replayed, 0);
    assert_eq!(db.config().page_size, 256);
    assert_eq!(db.begin(TxLockMode::Shared).id().0, 1);
    Ok(())
}
