use std::io::{self, Read};

use crate::common::{PagePos, Result, TransactionID, VaultError};

/// Snapshots larger than this are treated as corruption rather than allocated.
const MAX_SNAPSHOT_LEN: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    CommitRecord = 1,
    AbortRecord = 2,
    UpdateRecord = 3,
}

impl TryFrom<u8> for LogRecordType {
    type Error = VaultError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::CommitRecord),
            2 => Ok(LogRecordType::AbortRecord),
            3 => Ok(LogRecordType::UpdateRecord),
            _ => Err(VaultError::InvalidLogRecord(format!(
                "unknown record type {}",
                value
            ))),
        }
    }
}

/// One WAL entry. Updates carry the whole marshaled page, so replaying a
/// record any number of times leaves the same bytes behind.
///
/// Wire layout: `[type:u8][tx_id:i64]`, followed for updates by
/// `[pos:i64][snapshot_len:i64][snapshot]`, all little endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Update {
        tx_id: TransactionID,
        pos: PagePos,
        snapshot: Vec<u8>,
    },
    Commit {
        tx_id: TransactionID,
    },
    Abort {
        tx_id: TransactionID,
    },
}

fn read_i64_field<R: Read>(reader: &mut R, field: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated)?;
    let value = i64::from_le_bytes(buf);
    u64::try_from(value)
        .map_err(|_| VaultError::InvalidLogRecord(format!("negative {}: {}", field, value)))
}

fn truncated(e: io::Error) -> VaultError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        VaultError::TruncatedLogRecord
    } else {
        VaultError::IOError(e)
    }
}

impl LogRecord {
    pub fn tx_id(&self) -> TransactionID {
        match self {
            LogRecord::Update { tx_id, .. }
            | LogRecord::Commit { tx_id }
            | LogRecord::Abort { tx_id } => *tx_id,
        }
    }

    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Update { .. } => LogRecordType::UpdateRecord,
            LogRecord::Commit { .. } => LogRecordType::CommitRecord,
            LogRecord::Abort { .. } => LogRecordType::AbortRecord,
        }
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.record_type() as u8);
        buf.extend_from_slice(&(self.tx_id().0 as i64).to_le_bytes());

        if let LogRecord::Update { pos, snapshot, .. } = self {
            buf.extend_from_slice(&(pos.0 as i64).to_le_bytes());
            buf.extend_from_slice(&(snapshot.len() as i64).to_le_bytes());
            buf.extend_from_slice(snapshot);
        }
        buf
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            LogRecord::Update { snapshot, .. } => 1 + 8 * 3 + snapshot.len(),
            _ => 1 + 8,
        }
    }

    /// Decodes the next record from `reader`. `Ok(None)` means the reader was
    /// exhausted exactly at a record boundary; a partial record is
    /// [`VaultError::TruncatedLogRecord`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<LogRecord>> {
        let mut record_type = [0u8; 1];
        loop {
            match reader.read(&mut record_type) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let record_type = LogRecordType::try_from(record_type[0])?;
        let tx_id = TransactionID(read_i64_field(reader, "transaction id")?);

        let record = match record_type {
            LogRecordType::CommitRecord => LogRecord::Commit { tx_id },
            LogRecordType::AbortRecord => LogRecord::Abort { tx_id },
            LogRecordType::UpdateRecord => {
                let pos = PagePos(read_i64_field(reader, "page position")?);
                let len = read_i64_field(reader, "snapshot length")?;
                if len > MAX_SNAPSHOT_LEN {
                    return Err(VaultError::InvalidLogRecord(format!(
                        "snapshot length {} exceeds {}",
                        len, MAX_SNAPSHOT_LEN
                    )));
                }
                let mut snapshot = vec![0u8; len as usize];
                reader.read_exact(&mut snapshot).map_err(truncated)?;
                LogRecord::Update {
                    tx_id,
                    pos,
                    snapshot,
                }
            }
        };
        Ok(Some(record))
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<LogRecord> {
        let mut cursor = bytes;
        LogRecord::read_from(&mut cursor)?.ok_or(VaultError::TruncatedLogRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_layout_matches_wire_format() {
        let record = LogRecord::Update {
            tx_id: TransactionID(7),
            pos: PagePos(4096),
            snapshot: vec![0xAA; 3],
        };
        let bytes = record.marshal();

        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..9], &7i64.to_le_bytes());
        assert_eq!(&bytes[9..17], &4096i64.to_le_bytes());
        assert_eq!(&bytes[17..25], &3i64.to_le_bytes());
        assert_eq!(&bytes[25..], &[0xAA; 3]);
        assert_eq!(LogRecord::unmarshal(&bytes).unwrap(), record);
    }

    #[test]
    fn commit_and_abort_carry_only_the_tx_id() {
        let commit = LogRecord::Commit { tx_id: TransactionID(9) }.marshal();
        assert_eq!(commit.len(), 9);
        assert_eq!(commit[0], LogRecordType::CommitRecord as u8);

        let abort = LogRecord::Abort { tx_id: TransactionID(9) }.marshal();
        assert_eq!(abort[0], LogRecordType::AbortRecord as u8);
    }

    #[test]
    fn partial_record_is_reported_as_truncated() {
        let bytes = LogRecord::Update {
            tx_id: TransactionID(1),
            pos: PagePos(0),
            snapshot: vec![1; 16],
        }
        .marshal();

        let err = LogRecord::unmarshal(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, VaultError::TruncatedLogRecord));
    }

    #[test]
    fn rejects_unknown_type_and_negative_fields() {
        assert!(matches!(
            LogRecord::unmarshal(&[9, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(VaultError::InvalidLogRecord(_))
        ));

        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        assert!(matches!(
            LogRecord::unmarshal(&bytes),
            Err(VaultError::InvalidLogRecord(_))
        ));
    }
}
