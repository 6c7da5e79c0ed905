//! In-memory page image and its on-disk codec.
//!
//! ```text
//! +---------------------------+----------------------+-------------------+
//! | header (8 bytes, bincode) | payload              | crc32 (4 bytes)   |
//! | num_records | free_space  |                      | Checksummed only  |
//! +---------------------------+----------------------+-------------------+
//! ```

use serde::{Deserialize, Serialize};

use crate::common::{Result, VaultError};

pub const PAGE_HEADER_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageFormat {
    #[default]
    Plain,
    /// Adds a CRC32 trailer checked on every unmarshal.
    Checksummed,
}

impl PageFormat {
    pub fn trailer_size(self) -> usize {
        match self {
            PageFormat::Plain => 0,
            PageFormat::Checksummed => CHECKSUM_SIZE,
        }
    }

    /// Smallest page that still has room for one payload byte.
    pub fn min_page_size(self) -> usize {
        PAGE_HEADER_SIZE + self.trailer_size() + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PageHeader {
    num_records: u32,
    free_space: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    header: PageHeader,
    payload: Vec<u8>,
    format: PageFormat,
}

impl Page {
    pub fn new(page_size: usize, format: PageFormat) -> Self {
        // Undersized pages get an empty payload; writing one fails the size check.
        let payload_len = page_size.saturating_sub(PAGE_HEADER_SIZE + format.trailer_size());
        Self {
            header: PageHeader {
                num_records: 0,
                free_space: payload_len as u32,
            },
            payload: vec![0; payload_len],
            format,
        }
    }

    pub fn page_size(&self) -> usize {
        PAGE_HEADER_SIZE + self.payload.len() + self.format.trailer_size()
    }

    pub fn format(&self) -> PageFormat {
        self.format
    }

    pub fn num_records(&self) -> u32 {
        self.header.num_records
    }

    pub fn set_num_records(&mut self, num_records: u32) {
        self.header.num_records = num_records;
    }

    pub fn free_space(&self) -> u32 {
        self.header.free_space
    }

    pub fn set_free_space(&mut self, free_space: u32) {
        self.header.free_space = free_space;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.page_size());
        bytes.extend_from_slice(&bincode::serialize(&self.header)?);
        bytes.extend_from_slice(&self.payload);

        if self.format == PageFormat::Checksummed {
            let crc = crc32fast::hash(&bytes);
            bytes.extend_from_slice(&crc.to_le_bytes());
        }
        Ok(bytes)
    }

    pub fn unmarshal(bytes: &[u8], format: PageFormat) -> Result<Self> {
        let trailer = format.trailer_size();
        if bytes.len() <= PAGE_HEADER_SIZE + trailer {
            return Err(VaultError::Other(format!(
                "Page image of {} bytes is too short",
                bytes.len()
            )));
        }

        let body_len = bytes.len() - trailer;
        if format == PageFormat::Checksummed && bytes.iter().any(|&b| b != 0) {
            let mut stored = [0u8; CHECKSUM_SIZE];
            stored.copy_from_slice(&bytes[body_len..]);
            let expected = u32::from_le_bytes(stored);
            let found = crc32fast::hash(&bytes[..body_len]);
            if expected != found {
                return Err(VaultError::ChecksumMismatch { expected, found });
            }
        }

        let header: PageHeader = bincode::deserialize(&bytes[..PAGE_HEADER_SIZE])?;
        Ok(Self {
            header,
            payload: bytes[PAGE_HEADER_SIZE..body_len].to_vec(),
            format,
        })
    }
}
