//! WAL record format
//!
//! Frame layout on disk:
//!
//! ```text
//! [length: u32 LE] [payload bytes] [crc32 over payload: u32 LE]
//! ```
//!
//! Payload layout:
//!
//! ```text
//! magic u32 | version u32 | kind u16 | tx_id u64 | row_id u64 | lsn u64
//!   | table_name (u32 len + bytes) | column_name (u32 len + bytes)
//!   | tagged value
//! ```
//!
//! The value slot carries a single tagged value for update records and a
//! whole attribute map (tag 6) for insert records. A truncated or
//! CRC-damaged frame at the end of the log is treated as a clean end of
//! log by the reader; the same damage before the tail is an error.

use crc32fast::Hasher;

use crate::codec::{
    read_row, read_value, write_row, write_string_u32, write_u16, write_u32, write_u64,
    write_value, ByteReader, TAG_NULL, TAG_ROW,
};
use crate::error::{DbError, Result};
use crate::types::{Lsn, Row, RowId, TxId, Value};

pub const WAL_MAGIC: u32 = u32::from_le_bytes(*b"VWAL");
pub const WAL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum WalRecordKind {
    BeginTx = 1,
    CommitTx = 2,
    AbortTx = 3,
    InsertRow = 4,
    UpdateCol = 5,
    DeleteRow = 6,
    Checkpoint = 7,
}

impl TryFrom<u16> for WalRecordKind {
    type Error = DbError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(WalRecordKind::BeginTx),
            2 => Ok(WalRecordKind::CommitTx),
            3 => Ok(WalRecordKind::AbortTx),
            4 => Ok(WalRecordKind::InsertRow),
            5 => Ok(WalRecordKind::UpdateCol),
            6 => Ok(WalRecordKind::DeleteRow),
            7 => Ok(WalRecordKind::Checkpoint),
            other => Err(DbError::InvalidFileFormat(format!(
                "unknown WAL record kind {}",
                other
            ))),
        }
    }
}

/// Value slot of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalPayload {
    None,
    Value(Value),
    Row(Row),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub kind: WalRecordKind,
    pub tx_id: TxId,
    pub row_id: RowId,
    pub lsn: Lsn,
    pub table_name: String,
    pub column_name: String,
    pub payload: WalPayload,
}

impl WalRecord {
    pub fn begin_tx(tx_id: TxId) -> Self {
        Self::control(WalRecordKind::BeginTx, tx_id)
    }

    pub fn commit_tx(tx_id: TxId) -> Self {
        Self::control(WalRecordKind::CommitTx, tx_id)
    }

    pub fn abort_tx(tx_id: TxId) -> Self {
        Self::control(WalRecordKind::AbortTx, tx_id)
    }

    pub fn checkpoint() -> Self {
        Self::control(WalRecordKind::Checkpoint, 0)
    }

    fn control(kind: WalRecordKind, tx_id: TxId) -> Self {
        Self {
            kind,
            tx_id,
            row_id: 0,
            lsn: 0,
            table_name: String::new(),
            column_name: String::new(),
            payload: WalPayload::None,
        }
    }

    pub fn insert_row(tx_id: TxId, table: &str, row_id: RowId, row: Row) -> Self {
        Self {
            kind: WalRecordKind::InsertRow,
            tx_id,
            row_id,
            lsn: 0,
            table_name: table.to_string(),
            column_name: String::new(),
            payload: WalPayload::Row(row),
        }
    }

    pub fn update_col(
        tx_id: TxId,
        table: &str,
        row_id: RowId,
        column: &str,
        value: Value,
    ) -> Self {
        Self {
            kind: WalRecordKind::UpdateCol,
            tx_id,
            row_id,
            lsn: 0,
            table_name: table.to_string(),
            column_name: column.to_string(),
            payload: WalPayload::Value(value),
        }
    }

    pub fn delete_row(tx_id: TxId, table: &str, row_id: RowId) -> Self {
        Self {
            kind: WalRecordKind::DeleteRow,
            tx_id,
            row_id,
            lsn: 0,
            table_name: table.to_string(),
            column_name: String::new(),
            payload: WalPayload::None,
        }
    }

    /// Encode into a framed byte vector ready for appending.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64);
        write_u32(&mut payload, WAL_MAGIC);
        write_u32(&mut payload, WAL_VERSION);
        write_u16(&mut payload, self.kind as u16);
        write_u64(&mut payload, self.tx_id);
        write_u64(&mut payload, self.row_id);
        write_u64(&mut payload, self.lsn);
        write_string_u32(&mut payload, &self.table_name);
        write_string_u32(&mut payload, &self.column_name);
        match &self.payload {
            WalPayload::None => payload.push(TAG_NULL),
            WalPayload::Value(v) => write_value(&mut payload, v),
            WalPayload::Row(row) => {
                payload.push(TAG_ROW);
                write_row(&mut payload, row);
            }
        }

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(payload.len() + 8);
        write_u32(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);
        write_u32(&mut frame, crc);
        frame
    }

    /// Decode one frame from the front of `data`. Returns the record and
    /// the number of bytes consumed. `UnexpectedEof` means the frame is
    /// truncated; `CrcMismatch` means the frame is damaged. Both are
    /// tolerated at the tail of the log by the reader.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(DbError::UnexpectedEof("incomplete WAL frame header".into()));
        }
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let total = 4 + len + 4;
        if data.len() < total {
            return Err(DbError::UnexpectedEof(format!(
                "truncated WAL frame: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let payload = &data[4..4 + len];
        let stored_crc = u32::from_le_bytes([
            data[4 + len],
            data[4 + len + 1],
            data[4 + len + 2],
            data[4 + len + 3],
        ]);
        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(DbError::CrcMismatch("WAL record".into()));
        }

        let mut reader = ByteReader::new(payload);
        let magic = reader.read_u32()?;
        if magic != WAL_MAGIC {
            return Err(DbError::InvalidFileFormat(format!(
                "bad WAL record magic {:#010x}",
                magic
            )));
        }
        let version = reader.read_u32()?;
        if version != WAL_VERSION {
            return Err(DbError::UnsupportedVersion(version));
        }
        let kind = WalRecordKind::try_from(reader.read_u16()?)?;
        let tx_id = reader.read_u64()?;
        let row_id = reader.read_u64()?;
        let lsn = reader.read_u64()?;
        let table_name = reader.read_string_u32()?;
        let column_name = reader.read_string_u32()?;

        let payload = match kind {
            WalRecordKind::InsertRow => {
                let tag = reader.read_u8()?;
                if tag != TAG_ROW {
                    return Err(DbError::InvalidFileFormat(format!(
                        "insert record carries tag {}, expected row",
                        tag
                    )));
                }
                WalPayload::Row(read_row(&mut reader)?)
            }
            WalRecordKind::UpdateCol => WalPayload::Value(read_value(&mut reader)?),
            _ => {
                // Control records carry an empty (null-tagged) slot.
                let tag = reader.read_u8()?;
                if tag != TAG_NULL {
                    return Err(DbError::InvalidFileFormat(format!(
                        "control record carries unexpected value tag {}",
                        tag
                    )));
                }
                WalPayload::None
            }
        };

        Ok((
            Self {
                kind,
                tx_id,
                row_id,
                lsn,
                table_name,
                column_name,
                payload,
            },
            total,
        ))
    }
}
