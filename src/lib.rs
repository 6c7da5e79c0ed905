pub mod buffer;
pub mod common;
pub mod lock;
pub mod log_mod;
pub mod recovery;
pub mod storage;
pub mod transaction;

pub use buffer::BufferPoolManager;
pub use common::{DatabaseConfig, PagePos, Result, TransactionID, VaultError};
pub use lock::{LockMode, LockTable};
pub use log_mod::LogManager;
pub use recovery::{RecoveryManager, RecoveryReport};
pub use storage::{DBFiles, Page, PageFormat, StorageManager};
pub use transaction::{Transaction, TransactionManager, Tx, TxLockMode};

use std::path::Path;
use std::sync::Arc;

use log::info;

pub struct Database {
    files: DBFiles,
    config: DatabaseConfig,
    transaction_manager: TransactionManager,
    recovery_report: RecoveryReport,
}

impl Database {
    /// Opens (or creates) the database under `db_path` and replays the log
    /// before handing it out.
    pub fn open(db_path: &Path, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let files = DBFiles::new(db_path)?;

        // Leaf-first: each component only sees what was built before it.
        let storage = Arc::new(StorageManager::open(
            &files.get_data_file_path(),
            config.page_size,
        )?);
        let buffer = Arc::new(BufferPoolManager::new(
            Arc::clone(&storage),
            config.buffer_pool_size,
            config.page_format,
        )?);
        let log = Arc::new(LogManager::new(
            files.get_log_directory(),
            config.segment_capacity,
        )?);
        let locks = Arc::new(LockTable::new(config.lock_timeout));
        let transaction_manager = TransactionManager::new(storage, buffer, locks, log);

        let recovery_report = RecoveryManager::roll_forward(&transaction_manager)?;
        info!("database at {:?} is open", db_path);

        Ok(Self {
            files,
            config,
            transaction_manager,
            recovery_report,
        })
    }

    pub fn begin(&self, lock_mode: TxLockMode) -> Transaction {
        self.transaction_manager.init_tx(lock_mode)
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn files(&self) -> &DBFiles {
        &self.files
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    pub fn close(self) -> Result<()> {
        self.transaction_manager.log_manager().flush()?;
        self.transaction_manager.storage_manager().flush()?;
        Ok(())
    }
}
