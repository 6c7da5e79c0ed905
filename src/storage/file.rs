use std::fs::{File as StdFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    READ,
    WRITE,
}

// File abstraction - lets us swap between real files and in-memory for testing

pub trait File {
    fn get_mode(&self) -> FileMode;
    fn size(&self) -> Result<usize>;
    fn resize(&mut self, new_size: usize) -> Result<()>;
    /// Fills `buf` from `offset`. The whole range must lie inside the file.
    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;
    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()>;
    /// Makes every completed write durable.
    fn sync(&mut self) -> Result<()>;
}

fn read_only_error(action: &str) -> VaultError {
    VaultError::Other(format!("Cannot {} a read-only file", action))
}

fn check_bounds(offset: usize, len: usize, file_size: usize) -> Result<()> {
    if offset + len > file_size {
        return Err(VaultError::Other(format!(
            "Attempt to read past end of file: offset={}, size={}, filesize={}",
            offset, len, file_size
        )));
    }
    Ok(())
}

pub struct PosixFile {
    mode: FileMode,
    file: StdFile,
    cached_size: usize,
}

impl PosixFile {
    pub fn new(path: &Path, mode: FileMode) -> Result<Self> {
        let file = match mode {
            FileMode::READ => OpenOptions::new().read(true).open(path)?,
            FileMode::WRITE => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };

        let cached_size = file.metadata()?.len() as usize;

        Ok(Self {
            mode,
            file,
            cached_size,
        })
    }

    pub fn make_temporary() -> Result<Self> {
        use std::env::temp_dir;
        use uuid::Uuid;

        let temp_path = temp_dir().join(format!("pagevault-temp-{}.tmp", Uuid::new_v4()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&temp_path)?;

        // Unlinked right away; the handle keeps the inode alive.
        std::fs::remove_file(&temp_path)?;

        Ok(Self {
            mode: FileMode::WRITE,
            file,
            cached_size: 0,
        })
    }
}

impl File for PosixFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.cached_size)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size == self.cached_size {
            return Ok(());
        }
        if self.mode == FileMode::READ {
            return Err(read_only_error("resize"));
        }

        self.file.set_len(new_size as u64)?;
        self.cached_size = new_size;
        Ok(())
    }

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.cached_size)?;

        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("write to"));
        }

        if offset + block.len() > self.cached_size {
            self.resize(offset + block.len())?;
        }

        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(block)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.mode == FileMode::WRITE {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

// In-memory file implementation - useful for testing without hitting disk
pub struct MemoryFile {
    mode: FileMode,
    data: Vec<u8>,
}

impl MemoryFile {
    pub fn new(mode: FileMode) -> Self {
        Self {
            mode,
            data: Vec::new(),
        }
    }

    pub fn with_data(data: Vec<u8>, mode: FileMode) -> Self {
        Self { mode, data }
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }
}

impl File for MemoryFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("resize"));
        }

        self.data.resize(new_size, 0);
        Ok(())
    }

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.data.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("write to"));
        }

        if offset + block.len() > self.data.len() {
            self.resize(offset + block.len())?;
        }

        self.data[offset..offset + block.len()].copy_from_slice(block);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
