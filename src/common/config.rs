use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Result, VaultError};
use crate::storage::{PageFormat, PAGE_HEADER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub buffer_pool_size: usize,
    /// Upper bound in bytes for a single WAL segment file.
    pub segment_capacity: usize,
    pub lock_timeout: Duration,
    pub page_format: PageFormat,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            buffer_pool_size: 1000,
            segment_capacity: 4 * 1024 * 1024,
            lock_timeout: Duration::from_secs(5),
            page_format: PageFormat::Plain,
        }
    }
}

impl DatabaseConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_pool_size(mut self, buffer_pool_size: usize) -> Self {
        self.buffer_pool_size = buffer_pool_size;
        self
    }

    pub fn with_segment_capacity(mut self, segment_capacity: usize) -> Self {
        self.segment_capacity = segment_capacity;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_page_format(mut self, page_format: PageFormat) -> Self {
        self.page_format = page_format;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let overhead = PAGE_HEADER_SIZE + self.page_format.trailer_size();
        if self.page_size <= overhead {
            return Err(VaultError::InvalidConfig(format!(
                "page_size {} leaves no room for payload (overhead {})",
                self.page_size, overhead
            )));
        }
        if self.buffer_pool_size == 0 {
            return Err(VaultError::InvalidConfig(
                "buffer_pool_size must be positive".to_string(),
            ));
        }
        if self.segment_capacity == 0 {
            return Err(VaultError::InvalidConfig(
                "segment_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
