//! WAL reader
//!
//! Enumerates segment files in sequence order and yields their records.
//! A truncated or CRC-damaged record at the tail of the final segment is
//! a clean end of log; the same damage anywhere else is fatal.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{DbError, Result};
use crate::wal::record::WalRecord;
use crate::wal::writer::list_segments;

pub struct WalReader {
    segments: Vec<(u64, PathBuf)>,
}

impl WalReader {
    pub fn new(dir: &Path) -> Result<Self> {
        let segments = if dir.exists() {
            list_segments(dir)?
        } else {
            Vec::new()
        };
        Ok(Self { segments })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Read every record across all segments, in log order.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();
        let last_index = self.segments.len().saturating_sub(1);

        for (i, (_, path)) in self.segments.iter().enumerate() {
            let data = std::fs::read(path)?;
            let mut pos = 0usize;
            while pos < data.len() {
                match WalRecord::decode(&data[pos..]) {
                    Ok((record, used)) => {
                        records.push(record);
                        pos += used;
                    }
                    Err(DbError::UnexpectedEof(_)) | Err(DbError::CrcMismatch(_))
                        if i == last_index =>
                    {
                        warn!(
                            segment = %path.display(),
                            offset = pos,
                            "ignoring damaged WAL tail"
                        );
                        return Ok(records);
                    }
                    Err(e) => {
                        return Err(DbError::InvalidFileFormat(format!(
                            "corrupt WAL segment {}: {}",
                            path.display(),
                            e
                        )));
                    }
                }
            }
        }
        Ok(records)
    }
}
