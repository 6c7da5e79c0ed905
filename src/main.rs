use env_logger::Builder;
use log::{info, LevelFilter};
use std::path::PathBuf;

use pagevault::{Database, DatabaseConfig, TxLockMode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("pagevault storage kernel");

    let (db_path, scratch) = match std::env::args().nth(1) {
        Some(path) => (PathBuf::from(path), false),
        None => (std::env::temp_dir().join("pagevault-demo"), true),
    };

    let db = Database::open(&db_path, DatabaseConfig::default())?;
    let report = db.recovery_report();
    info!(
        "recovered {} committed and {} unfinished transaction(s)",
        report.committed, report.rolled_back
    );

    let mut txn = db.begin(TxLockMode::Exclusive);
    let mut page = txn.allocate_page();
    page.payload_mut()[..5].copy_from_slice(b"hello");
    page.set_num_records(1);
    let pos = txn.write_page(&page)?;
    txn.commit()?;
    info!("Committed transaction {} writing page {}", txn.id(), pos);

    let mut reader = db.begin(TxLockMode::Shared);
    let page = reader.read_page_at_pos(pos)?;
    info!(
        "Read back {:?} with {} record(s)",
        String::from_utf8_lossy(&page.payload()[..5]),
        page.num_records()
    );
    reader.commit()?;

    db.close()?;
    if scratch {
        std::fs::remove_dir_all(&db_path)?;
    }

    Ok(())
}
