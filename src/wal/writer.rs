//! WAL segment writer
//!
//! Append-only writer over a directory of sequentially numbered segment
//! files. Appends assign strictly monotonic LSNs; an append that would
//! push the active segment past the configured size bound rotates first.
//! Rotation creates the replacement segment before the switch, so a
//! failed rotation leaves the writer with its previous, still-valid
//! file handle.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DbError, Result};
use crate::types::Lsn;
use crate::wal::record::WalRecord;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

pub(crate) fn segment_file_name(sequence: u64) -> String {
    format!("{}{:06}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX)
}

pub(crate) fn parse_segment_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Sorted list of (sequence, path) for every segment in `dir`.
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(seq) = parse_segment_sequence(name) {
                segments.push((seq, entry.path()));
            }
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

pub struct WalWriter {
    dir: PathBuf,
    file: File,
    sequence: u64,
    segment_size: u64,
    max_file_size: u64,
    next_lsn: Lsn,
}

impl WalWriter {
    /// Open (or create) the log in `dir`, resuming the highest existing
    /// segment. Scans existing segments to restore the LSN counter and
    /// truncates a damaged tail so new appends land after the last valid
    /// record.
    pub fn open(dir: &Path, max_file_size: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let segments = list_segments(dir)?;

        let mut next_lsn: Lsn = 1;
        let (sequence, path) = match segments.last() {
            Some((seq, path)) => (*seq, path.clone()),
            None => (1, dir.join(segment_file_name(1))),
        };

        // Earlier segments only contribute to the LSN high-water mark.
        for (seq, path) in &segments {
            let data = std::fs::read(path)?;
            let is_last = *seq == sequence;
            let (valid_end, max_lsn) = scan_segment(&data, is_last, path)?;
            if let Some(lsn) = max_lsn {
                next_lsn = next_lsn.max(lsn + 1);
            }
            if is_last && valid_end < data.len() {
                warn!(
                    segment = %path.display(),
                    dropped = data.len() - valid_end,
                    "truncating damaged WAL tail"
                );
                let f = OpenOptions::new().write(true).open(path)?;
                f.set_len(valid_end as u64)?;
                f.sync_all()?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let segment_size = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            sequence,
            segment_size,
            max_file_size,
            next_lsn,
        })
    }

    /// Append a record, assigning it the next LSN. Does not fsync.
    pub fn append(&mut self, mut record: WalRecord) -> Result<Lsn> {
        record.lsn = self.next_lsn;
        let frame = record.encode();

        if self.segment_size > 0 && self.segment_size + frame.len() as u64 > self.max_file_size {
            self.rotate()?;
        }

        self.file.write_all(&frame)?;
        self.segment_size += frame.len() as u64;
        self.next_lsn += 1;
        Ok(record.lsn)
    }

    /// Fsync everything appended so far.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Append a checkpoint marker, fsync, and return its LSN. Callers
    /// persist table images keyed by this LSN.
    pub fn checkpoint(&mut self) -> Result<Lsn> {
        let lsn = self.append(WalRecord::checkpoint())?;
        self.flush()?;
        Ok(lsn)
    }

    /// Switch to a fresh segment: create the new file first, then swap
    /// handles, letting the old one close. On failure the writer keeps
    /// its current segment and stays usable.
    pub fn rotate(&mut self) -> Result<()> {
        let next_seq = self.sequence + 1;
        let path = self.dir.join(segment_file_name(next_seq));
        let new_file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| DbError::RotationFailed(format!("{}: {}", path.display(), e)))?;

        // Old segment contents must be durable before the switch.
        self.file.sync_data()?;
        self.file = new_file;
        self.sequence = next_seq;
        self.segment_size = 0;
        debug!(segment = %path.display(), "rotated WAL segment");
        Ok(())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        let _ = self.file.sync_data();
    }
}

/// Walk a segment's frames. Returns (offset past the last valid record,
/// highest LSN seen). Damage is tolerated only in the final segment.
fn scan_segment(data: &[u8], is_last: bool, path: &Path) -> Result<(usize, Option<Lsn>)> {
    let mut pos = 0usize;
    let mut max_lsn = None;
    while pos < data.len() {
        match WalRecord::decode(&data[pos..]) {
            Ok((record, used)) => {
                max_lsn = Some(max_lsn.map_or(record.lsn, |m: Lsn| m.max(record.lsn)));
                pos += used;
            }
            Err(DbError::UnexpectedEof(_)) | Err(DbError::CrcMismatch(_)) if is_last => {
                return Ok((pos, max_lsn));
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
    Ok((pos, max_lsn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Row, Value};
    use crate::wal::record::WalRecordKind;
    use crate::wal::WalReader;
    use tempfile::TempDir;

    fn insert_record(tx: u64, row_id: u64) -> WalRecord {
        let mut row = Row::new();
        row.push("id", Value::Int(row_id as i64));
        row.push("payload", Value::Text("x".repeat(32)));
        WalRecord::insert_row(tx, "stress", row_id, row)
    }

    #[test]
    fn test_lsns_are_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
        let l1 = writer.append(WalRecord::begin_tx(1)).unwrap();
        let l2 = writer.append(insert_record(1, 1)).unwrap();
        let l3 = writer.append(WalRecord::commit_tx(1)).unwrap();
        assert!(l1 < l2 && l2 < l3);
    }

    #[test]
    fn test_writer_resumes_lsn_after_reopen() {
        let dir = TempDir::new().unwrap();
        let last = {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer.append(WalRecord::commit_tx(1)).unwrap()
        };
        let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
        let next = writer.append(WalRecord::begin_tx(2)).unwrap();
        assert_eq!(next, last + 1);
    }

    #[test]
    fn test_rotation_under_size_pressure() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::open(dir.path(), 6000).unwrap();
        let start_seq = writer.sequence();

        for i in 0..500u64 {
            writer.append(insert_record(1, i)).unwrap();
        }
        let final_commit_lsn = writer.append(WalRecord::commit_tx(1)).unwrap();
        writer.flush().unwrap();

        assert!(
            writer.sequence() >= start_seq + 3,
            "sequence advanced only to {}",
            writer.sequence()
        );

        // Every record written before rotation is still readable, and the
        // commit after the last rotation is seen by a fresh reader.
        let records = WalReader::new(dir.path()).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 501);
        let last = records.last().unwrap();
        assert_eq!(last.kind, WalRecordKind::CommitTx);
        assert_eq!(last.lsn, final_commit_lsn);
        let inserts = records
            .iter()
            .filter(|r| r.kind == WalRecordKind::InsertRow)
            .count();
        assert_eq!(inserts, 500);
    }

    #[test]
    fn test_failed_rotation_keeps_writer_usable() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
        writer.append(WalRecord::begin_tx(1)).unwrap();

        // Pre-create the next segment so create_new fails.
        let blocker = dir.path().join(segment_file_name(writer.sequence() + 1));
        std::fs::write(&blocker, b"occupied").unwrap();

        let err = writer.rotate().unwrap_err();
        assert!(matches!(err, DbError::RotationFailed(_)));

        // The pre-rotation handle still accepts appends.
        writer.append(WalRecord::commit_tx(1)).unwrap();
        writer.flush().unwrap();
        std::fs::remove_file(&blocker).unwrap();
        let records = WalReader::new(dir.path()).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_checkpoint_returns_lsn() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
        writer.append(WalRecord::begin_tx(1)).unwrap();
        let ck = writer.checkpoint().unwrap();
        assert_eq!(ck, writer.next_lsn() - 1);
    }

    #[test]
    fn test_damaged_tail_truncated_on_reopen() {
        let dir = TempDir::new().unwrap();
        let seg_path = {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer.append(WalRecord::commit_tx(1)).unwrap();
            writer.flush().unwrap();
            dir.path().join(segment_file_name(writer.sequence()))
        };

        // Append garbage that looks like a frame header.
        let mut data = std::fs::read(&seg_path).unwrap();
        let good_len = data.len();
        data.extend_from_slice(&[0x20, 0, 0, 0, 1, 2, 3]);
        std::fs::write(&seg_path, &data).unwrap();

        let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
        assert_eq!(std::fs::metadata(&seg_path).unwrap().len() as usize, good_len);
        writer.append(WalRecord::begin_tx(2)).unwrap();
        writer.flush().unwrap();

        let records = WalReader::new(dir.path()).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 3);
    }
}
