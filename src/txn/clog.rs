//! Commit log (CLOG)
//!
//! Maps transaction ids to their current or final status. Txid 0 is the
//! bootstrap transaction and always reads as committed; unknown txids
//! read as in-progress.

use dashmap::DashMap;
use std::path::Path;

use crate::codec::{write_u32, ByteReader};
use crate::error::{DbError, Result};
use crate::types::TxId;

const CLOG_MAGIC: u32 = u32::from_le_bytes(*b"CLOG");
const CLOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    InProgress,
    Committed,
    Aborted,
}

impl TxStatus {
    fn tag(&self) -> u8 {
        match self {
            TxStatus::InProgress => 0,
            TxStatus::Committed => 1,
            TxStatus::Aborted => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(TxStatus::InProgress),
            1 => Ok(TxStatus::Committed),
            2 => Ok(TxStatus::Aborted),
            other => Err(DbError::InvalidFileFormat(format!(
                "unknown transaction status tag {}",
                other
            ))),
        }
    }
}

/// In-memory commit log with binary save/load.
#[derive(Debug, Default)]
pub struct CommitLog {
    statuses: DashMap<TxId, TxStatus>,
    /// Logical commit timestamps, runtime-only; the write-conflict check
    /// compares them against snapshot timestamps. Not persisted: after a
    /// restart no live snapshot predates any recorded commit.
    commit_ts: DashMap<TxId, u64>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, txid: TxId) -> TxStatus {
        if txid == 0 {
            return TxStatus::Committed;
        }
        self.statuses
            .get(&txid)
            .map(|s| *s)
            .unwrap_or(TxStatus::InProgress)
    }

    pub fn is_committed(&self, txid: TxId) -> bool {
        self.status(txid) == TxStatus::Committed
    }

    pub fn is_aborted(&self, txid: TxId) -> bool {
        self.status(txid) == TxStatus::Aborted
    }

    pub fn set_in_progress(&self, txid: TxId) {
        if txid != 0 {
            self.statuses.insert(txid, TxStatus::InProgress);
        }
    }

    pub fn set_committed(&self, txid: TxId, timestamp: u64) {
        if txid != 0 {
            self.statuses.insert(txid, TxStatus::Committed);
            self.commit_ts.insert(txid, timestamp);
        }
    }

    pub fn set_aborted(&self, txid: TxId) {
        if txid != 0 {
            self.statuses.insert(txid, TxStatus::Aborted);
        }
    }

    /// Commit timestamp for a committed transaction; 0 when unknown
    /// (e.g. commits recovered from a previous process).
    pub fn commit_timestamp(&self, txid: TxId) -> u64 {
        self.commit_ts.get(&txid).map(|ts| *ts).unwrap_or(0)
    }

    /// Highest txid with a recorded status. Used at startup to seed the
    /// txid counter past everything recovered.
    pub fn max_known_txid(&self) -> TxId {
        self.statuses.iter().map(|e| *e.key()).max().unwrap_or(0)
    }

    /// Force every in-progress transaction to aborted. Recovery calls
    /// this after WAL replay; an in-flight transaction at crash time can
    /// never commit.
    pub fn force_abort_in_progress(&self) -> usize {
        let stragglers: Vec<TxId> = self
            .statuses
            .iter()
            .filter(|e| *e.value() == TxStatus::InProgress)
            .map(|e| *e.key())
            .collect();
        for txid in &stragglers {
            self.statuses.insert(*txid, TxStatus::Aborted);
        }
        stragglers.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        write_u32(&mut buf, CLOG_MAGIC);
        write_u32(&mut buf, CLOG_VERSION);

        let entries: Vec<(TxId, TxStatus)> = self
            .statuses
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        write_u32(&mut buf, entries.len() as u32);
        for (txid, status) in entries {
            buf.extend_from_slice(&txid.to_le_bytes());
            buf.push(status.tag());
        }

        std::fs::write(path, buf)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut reader = ByteReader::new(&data);

        let magic = reader.read_u32()?;
        if magic != CLOG_MAGIC {
            return Err(DbError::InvalidFileFormat(format!(
                "bad CLOG magic {:#010x}",
                magic
            )));
        }
        let version = reader.read_u32()?;
        if version != CLOG_VERSION {
            return Err(DbError::UnsupportedVersion(version));
        }

        let clog = CommitLog::new();
        let count = reader.read_u32()?;
        for _ in 0..count {
            let txid = reader.read_u64()?;
            let status = TxStatus::from_tag(reader.read_u8()?)?;
            if txid != 0 {
                clog.statuses.insert(txid, status);
            }
        }
        Ok(clog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bootstrap_txid_always_committed() {
        let clog = CommitLog::new();
        assert_eq!(clog.status(0), TxStatus::Committed);
        // Even a stored status cannot override it.
        clog.set_aborted(0);
        assert_eq!(clog.status(0), TxStatus::Committed);
    }

    #[test]
    fn test_unknown_txid_is_in_progress() {
        let clog = CommitLog::new();
        assert_eq!(clog.status(99), TxStatus::InProgress);
    }

    #[test]
    fn test_status_transitions() {
        let clog = CommitLog::new();
        clog.set_in_progress(5);
        assert_eq!(clog.status(5), TxStatus::InProgress);
        clog.set_committed(5, 17);
        assert_eq!(clog.status(5), TxStatus::Committed);
        assert_eq!(clog.commit_timestamp(5), 17);

        clog.set_in_progress(6);
        clog.set_aborted(6);
        assert_eq!(clog.status(6), TxStatus::Aborted);
    }

    #[test]
    fn test_force_abort_in_progress() {
        let clog = CommitLog::new();
        clog.set_in_progress(1);
        clog.set_committed(2, 1);
        clog.set_in_progress(3);

        let aborted = clog.force_abort_in_progress();
        assert_eq!(aborted, 2);
        assert_eq!(clog.status(1), TxStatus::Aborted);
        assert_eq!(clog.status(2), TxStatus::Committed);
        assert_eq!(clog.status(3), TxStatus::Aborted);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clog");

        let clog = CommitLog::new();
        clog.set_committed(1, 10);
        clog.set_aborted(2);
        clog.set_in_progress(3);
        clog.save(&path).unwrap();

        let loaded = CommitLog::load(&path).unwrap();
        assert_eq!(loaded.status(1), TxStatus::Committed);
        assert_eq!(loaded.status(2), TxStatus::Aborted);
        assert_eq!(loaded.status(3), TxStatus::InProgress);
        // Unknown stays in-progress by default.
        assert_eq!(loaded.status(42), TxStatus::InProgress);
        assert_eq!(loaded.max_known_txid(), 3);
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clog");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(matches!(
            CommitLog::load(&path),
            Err(DbError::InvalidFileFormat(_))
        ));
    }
}
