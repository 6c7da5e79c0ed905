use thiserror::Error;

use super::PagePos;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Timed out waiting for lock on page {0}")]
    LockTimeout(PagePos),

    #[error("Page checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("Page {0} is not resident in the buffer pool")]
    PageNotResident(PagePos),

    #[error("Page size exceeded: got {0}, max {1}")]
    PageSizeExceeded(usize, usize),

    #[error("Position {0} is not aligned to page size {1}")]
    MisalignedPosition(PagePos, usize),

    #[error("Invalid log record: {0}")]
    InvalidLogRecord(String),

    #[error("Truncated log record")]
    TruncatedLogRecord,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl VaultError {
    /// Errors a caller is expected to handle (abort and retry, or report
    /// corruption) rather than tear down the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::LockTimeout(_) | VaultError::ChecksumMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
