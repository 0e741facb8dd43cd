//! Transaction manager
//!
//! Hands out monotonic transaction ids, captures snapshots of the active
//! set at begin time, and moves transactions through the commit log.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::txn::CommitLog;
use crate::types::{Row, RowId, TxId};

/// An immutable view of the transactions in progress when a reader
/// started. `active` excludes the owner.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub txid: TxId,
    pub timestamp: u64,
    pub active: HashSet<TxId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// One entry in a transaction's undo log. Rollback walks these in
/// reverse to unwind index entries and same-transaction fresh inserts.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert {
        table: String,
        row_id: RowId,
        row: Row,
    },
    Update {
        table: String,
        row_id: RowId,
        old_row: Row,
        new_row: Row,
    },
    Delete {
        table: String,
        row_id: RowId,
        row: Row,
    },
}

#[derive(Debug)]
pub struct Transaction {
    pub id: TxId,
    pub state: TxState,
    pub snapshot: Snapshot,
    pub writes: Vec<WriteOp>,
    /// Whether a begin_tx record has been appended to the WAL. Read-only
    /// transactions never touch the log.
    pub wal_logged: bool,
}

pub struct TransactionManager {
    next_txid: AtomicU64,
    /// Logical clock shared by snapshot and commit timestamps.
    clock: AtomicU64,
    active: Mutex<HashMap<TxId, Transaction>>,
    clog: Arc<CommitLog>,
}

impl TransactionManager {
    pub fn new(clog: Arc<CommitLog>) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            clock: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            clog,
        }
    }

    pub fn clog(&self) -> &CommitLog {
        &self.clog
    }

    /// Advance the txid counter past ids recovered from disk so that
    /// ids are never reused across restarts.
    pub fn seed_txid(&self, min_unused: TxId) {
        let mut cur = self.next_txid.load(Ordering::SeqCst);
        while cur < min_unused {
            match self.next_txid.compare_exchange(
                cur,
                min_unused,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Start a new transaction: assign the next txid, snapshot the
    /// current active set (excluding self) and register it in the CLOG.
    pub fn begin(&self) -> TxId {
        let mut active = self.active.lock();
        let txid = self.next_txid.fetch_add(1, Ordering::SeqCst);
        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst);

        let snapshot = Snapshot {
            txid,
            timestamp,
            active: active.keys().copied().collect(),
        };

        self.clog.set_in_progress(txid);
        active.insert(
            txid,
            Transaction {
                id: txid,
                state: TxState::Active,
                snapshot,
                writes: Vec::new(),
                wal_logged: false,
            },
        );
        txid
    }

    /// Commit: durably flip the CLOG entry, then drop the transaction
    /// from the active set. Returns the commit timestamp.
    pub fn commit(&self, txid: TxId) -> Result<u64> {
        let mut active = self.active.lock();
        let mut tx = active
            .remove(&txid)
            .ok_or(DbError::NoActiveTransaction)?;
        tx.state = TxState::Committed;
        let commit_ts = self.clock.fetch_add(1, Ordering::SeqCst);
        self.clog.set_committed(txid, commit_ts);
        Ok(commit_ts)
    }

    /// Roll back: mark aborted in the CLOG and hand the transaction
    /// (with its undo log) back to the caller for unwinding.
    pub fn rollback(&self, txid: TxId) -> Result<Transaction> {
        let mut active = self.active.lock();
        let mut tx = active
            .remove(&txid)
            .ok_or(DbError::NoActiveTransaction)?;
        tx.state = TxState::Aborted;
        self.clog.set_aborted(txid);
        Ok(tx)
    }

    pub fn snapshot_of(&self, txid: TxId) -> Option<Snapshot> {
        self.active.lock().get(&txid).map(|tx| tx.snapshot.clone())
    }

    pub fn is_active(&self, txid: TxId) -> bool {
        self.active.lock().contains_key(&txid)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn record_write(&self, txid: TxId, op: WriteOp) -> Result<()> {
        let mut active = self.active.lock();
        let tx = active.get_mut(&txid).ok_or(DbError::NoActiveTransaction)?;
        tx.writes.push(op);
        Ok(())
    }

    pub fn mark_wal_logged(&self, txid: TxId) -> bool {
        let mut active = self.active.lock();
        match active.get_mut(&txid) {
            Some(tx) if !tx.wal_logged => {
                tx.wal_logged = true;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn is_wal_logged(&self, txid: TxId) -> bool {
        self.active
            .lock()
            .get(&txid)
            .map(|tx| tx.wal_logged)
            .unwrap_or(false)
    }

    /// The VACUUM horizon: the smallest txid any live snapshot can still
    /// care about. For each live transaction that is the minimum of its
    /// own snapshot txid and every txid in its active set (a transaction
    /// that was in progress when the snapshot was taken stays relevant
    /// even if it has since committed). `None` when nothing is active.
    pub fn oldest_live_snapshot_txid(&self) -> Option<TxId> {
        self.active
            .lock()
            .values()
            .map(|tx| {
                tx.snapshot
                    .active
                    .iter()
                    .copied()
                    .chain(std::iter::once(tx.snapshot.txid))
                    .min()
                    .unwrap_or(tx.snapshot.txid)
            })
            .min()
    }

    /// A fresh snapshot that is not tied to any registered transaction;
    /// used by checkpointing to capture the latest committed state.
    pub fn latest_snapshot(&self) -> Snapshot {
        let active = self.active.lock();
        Snapshot {
            txid: self.next_txid.load(Ordering::SeqCst),
            timestamp: self.clock.load(Ordering::SeqCst),
            active: active.keys().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::TxStatus;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(CommitLog::new()))
    }

    #[test]
    fn test_txids_are_monotonic() {
        let mgr = manager();
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        let t3 = mgr.begin();
        assert!(t1 < t2 && t2 < t3);
    }

    #[test]
    fn test_snapshot_excludes_owner() {
        let mgr = manager();
        let t1 = mgr.begin();
        let t2 = mgr.begin();

        let s1 = mgr.snapshot_of(t1).unwrap();
        assert!(s1.active.is_empty());

        let s2 = mgr.snapshot_of(t2).unwrap();
        assert!(s2.active.contains(&t1));
        assert!(!s2.active.contains(&t2));
    }

    #[test]
    fn test_commit_updates_clog_and_active_set() {
        let mgr = manager();
        let t1 = mgr.begin();
        assert_eq!(mgr.active_count(), 1);
        assert_eq!(mgr.clog().status(t1), TxStatus::InProgress);

        let ts = mgr.commit(t1).unwrap();
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(mgr.clog().status(t1), TxStatus::Committed);
        assert_eq!(mgr.clog().commit_timestamp(t1), ts);
    }

    #[test]
    fn test_rollback_marks_aborted() {
        let mgr = manager();
        let t1 = mgr.begin();
        let tx = mgr.rollback(t1).unwrap();
        assert_eq!(tx.state, TxState::Aborted);
        assert_eq!(mgr.clog().status(t1), TxStatus::Aborted);
    }

    #[test]
    fn test_commit_unknown_txid_fails() {
        let mgr = manager();
        assert!(matches!(
            mgr.commit(42),
            Err(DbError::NoActiveTransaction)
        ));
        assert!(matches!(
            mgr.rollback(42),
            Err(DbError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_oldest_live_snapshot() {
        let mgr = manager();
        assert_eq!(mgr.oldest_live_snapshot_txid(), None);
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        assert_eq!(mgr.oldest_live_snapshot_txid(), Some(t1));
        mgr.commit(t1).unwrap();
        assert_eq!(mgr.oldest_live_snapshot_txid(), Some(t2));
    }

    #[test]
    fn test_seed_txid_never_goes_backwards() {
        let mgr = manager();
        mgr.seed_txid(100);
        assert_eq!(mgr.begin(), 100);
        mgr.seed_txid(50);
        assert_eq!(mgr.begin(), 101);
    }
}
