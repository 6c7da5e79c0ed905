use std::path::Path;

use log::trace;
use parking_lot::Mutex;

use super::file::{File, FileMode, PosixFile};
use crate::common::{PagePos, Result, VaultError};

/// Fixed-size block I/O over the single data file.
///
/// Every call goes through one mutex; the buffer pool in front of it absorbs
/// most of the traffic.
pub struct StorageManager {
    file: Mutex<Box<dyn File + Send>>,
    page_size: usize,
}

impl StorageManager {
    pub fn new(file: Box<dyn File + Send>, page_size: usize) -> Self {
        Self {
            file: Mutex::new(file),
            page_size,
        }
    }

    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = PosixFile::new(path, FileMode::WRITE)?;
        Ok(Self::new(Box::new(file), page_size))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn check_block(&self, pos: PagePos, len: usize) -> Result<usize> {
        if pos.0 % self.page_size as u64 != 0 {
            return Err(VaultError::MisalignedPosition(pos, self.page_size));
        }
        if len != self.page_size {
            return Err(VaultError::PageSizeExceeded(len, self.page_size));
        }
        Ok(pos.0 as usize)
    }

    /// Reads the page at `pos` into `buf`. Bytes beyond the end of the file
    /// read as zero, as for a page that was extended but never synced.
    pub fn read_block(&self, pos: PagePos, buf: &mut [u8]) -> Result<()> {
        let offset = self.check_block(pos, buf.len())?;
        let mut file = self.file.lock();
        let available = file.size()?.saturating_sub(offset).min(buf.len());

        if available > 0 {
            file.read_block(offset, &mut buf[..available])?;
        }
        buf[available..].fill(0);
        trace!("read block {} ({} bytes from disk)", pos, available);
        Ok(())
    }

    pub fn write_block(&self, pos: PagePos, buf: &[u8]) -> Result<()> {
        let offset = self.check_block(pos, buf.len())?;
        self.file.lock().write_block(buf, offset)?;
        trace!("wrote block {}", pos);
        Ok(())
    }

    /// Appends one zeroed page and returns its position.
    pub fn extend(&self) -> Result<PagePos> {
        let mut file = self.file.lock();
        let size = file.size()?;
        let offset = size.div_ceil(self.page_size) * self.page_size;
        file.write_block(&vec![0u8; self.page_size], offset)?;
        Ok(PagePos(offset as u64))
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync()
    }

    pub fn size(&self) -> Result<usize> {
        self.file.lock().size()
    }

    pub fn empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }
}
