//! Crash recovery
//!
//! Replays WAL records past the last checkpoint over freshly loaded
//! table images, reconstitutes the CLOG, and forces any transaction
//! still in progress at crash time to aborted. Committed transactions
//! are never lost; in-flight ones never survive.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::mvcc::Table;
use crate::txn::CommitLog;
use crate::types::{Lsn, TxId};
use crate::wal::{WalPayload, WalReader, WalRecordKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub records_replayed: usize,
    pub txns_aborted: usize,
    /// Highest txid seen anywhere in the log; the txid counter must
    /// resume above it.
    pub max_txid: TxId,
    /// Highest LSN seen; the writer resumes above it.
    pub last_lsn: Lsn,
}

/// Replay the log in `wal_dir`, skipping records at or before
/// `checkpoint_lsn` (already contained in the loaded table images).
pub fn replay(
    wal_dir: &Path,
    checkpoint_lsn: Lsn,
    tables: &mut BTreeMap<String, Table>,
    clog: &CommitLog,
) -> Result<RecoveryOutcome> {
    let records = WalReader::new(wal_dir)?.read_all()?;

    let mut replayed = 0usize;
    let mut max_txid: TxId = 0;
    let mut last_lsn: Lsn = 0;

    for record in records {
        last_lsn = last_lsn.max(record.lsn);
        if record.lsn <= checkpoint_lsn {
            continue;
        }
        max_txid = max_txid.max(record.tx_id);

        match record.kind {
            WalRecordKind::BeginTx => clog.set_in_progress(record.tx_id),
            // Commit timestamps do not survive a restart; no live
            // snapshot predates recovered history, so 0 is safe.
            WalRecordKind::CommitTx => clog.set_committed(record.tx_id, 0),
            WalRecordKind::AbortTx => clog.set_aborted(record.tx_id),
            // Checkpoint markers are resume points for the reader, not
            // replayable operations.
            WalRecordKind::Checkpoint => {}
            WalRecordKind::InsertRow => match tables.get_mut(&record.table_name) {
                Some(table) => {
                    if let WalPayload::Row(row) = record.payload {
                        table.replay_insert(record.row_id, row, record.tx_id);
                    }
                }
                None => {
                    warn!(
                        table = %record.table_name,
                        row_id = record.row_id,
                        "skipping insert replay for unknown table"
                    );
                }
            },
            WalRecordKind::UpdateCol => match tables.get_mut(&record.table_name) {
                Some(table) => {
                    if let WalPayload::Value(value) = record.payload {
                        table.replay_update(
                            record.row_id,
                            &record.column_name,
                            value,
                            record.tx_id,
                        );
                    }
                }
                None => {
                    warn!(
                        table = %record.table_name,
                        row_id = record.row_id,
                        "skipping update replay for unknown table"
                    );
                }
            },
            WalRecordKind::DeleteRow => match tables.get_mut(&record.table_name) {
                Some(table) => table.replay_delete(record.row_id, record.tx_id),
                None => {
                    warn!(
                        table = %record.table_name,
                        row_id = record.row_id,
                        "skipping delete replay for unknown table"
                    );
                }
            },
        }
        replayed += 1;
    }

    let txns_aborted = clog.force_abort_in_progress();
    info!(
        replayed,
        aborted = txns_aborted,
        last_lsn,
        "WAL replay complete"
    );

    Ok(RecoveryOutcome {
        records_replayed: replayed,
        txns_aborted,
        max_txid,
        last_lsn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{Snapshot, TxStatus};
    use crate::types::{Column, DataType, Row, Value};
    use crate::wal::{WalRecord, WalWriter};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn fresh_tables() -> BTreeMap<String, Table> {
        let mut tables = BTreeMap::new();
        tables.insert(
            "accounts".to_string(),
            Table::new(
                "accounts",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("balance", DataType::Int),
                ],
                true,
            ),
        );
        tables
    }

    fn account_row(id: i64, balance: i64) -> Row {
        let mut row = Row::new();
        row.push("id", Value::Int(id));
        row.push("balance", Value::Int(balance));
        row
    }

    fn snapshot(txid: u64) -> Snapshot {
        Snapshot {
            txid,
            timestamp: txid,
            active: HashSet::new(),
        }
    }

    #[test]
    fn test_committed_transaction_survives_replay() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer
                .append(WalRecord::insert_row(1, "accounts", 1, account_row(1, 100)))
                .unwrap();
            writer
                .append(WalRecord::update_col(1, "accounts", 1, "balance", Value::Int(150)))
                .unwrap();
            writer.append(WalRecord::commit_tx(1)).unwrap();
            writer.flush().unwrap();
        }

        let mut tables = fresh_tables();
        let clog = CommitLog::new();
        let outcome = replay(dir.path(), 0, &mut tables, &clog).unwrap();

        assert_eq!(outcome.records_replayed, 4);
        assert_eq!(outcome.txns_aborted, 0);
        assert_eq!(outcome.max_txid, 1);
        assert_eq!(clog.status(1), TxStatus::Committed);

        let table = &tables["accounts"];
        let row = table.get(1, &snapshot(10), &clog).unwrap();
        assert_eq!(row.get("balance"), Some(&Value::Int(150)));
        assert_eq!(table.chain_len(1), 2);
    }

    #[test]
    fn test_in_flight_transaction_forced_aborted() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer
                .append(WalRecord::insert_row(1, "accounts", 1, account_row(1, 100)))
                .unwrap();
            // Crash before commit.
            writer.flush().unwrap();
        }

        let mut tables = fresh_tables();
        let clog = CommitLog::new();
        let outcome = replay(dir.path(), 0, &mut tables, &clog).unwrap();

        assert_eq!(outcome.txns_aborted, 1);
        assert_eq!(clog.status(1), TxStatus::Aborted);
        // The replayed version exists but is invisible.
        assert!(tables["accounts"].get(1, &snapshot(10), &clog).is_none());
    }

    #[test]
    fn test_records_before_checkpoint_skipped() {
        let dir = TempDir::new().unwrap();
        let checkpoint_lsn;
        {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer
                .append(WalRecord::insert_row(1, "accounts", 1, account_row(1, 100)))
                .unwrap();
            writer.append(WalRecord::commit_tx(1)).unwrap();
            checkpoint_lsn = writer.checkpoint().unwrap();
            writer.append(WalRecord::begin_tx(2)).unwrap();
            writer
                .append(WalRecord::insert_row(2, "accounts", 9, account_row(9, 900)))
                .unwrap();
            writer.append(WalRecord::commit_tx(2)).unwrap();
            writer.flush().unwrap();
        }

        // The checkpointed image already holds row 1; replay must only
        // add row 9.
        let mut tables = fresh_tables();
        tables
            .get_mut("accounts")
            .unwrap()
            .replay_insert(1, account_row(1, 100), 1);
        let clog = CommitLog::new();
        clog.set_committed(1, 1);

        let outcome = replay(dir.path(), checkpoint_lsn, &mut tables, &clog).unwrap();
        assert_eq!(outcome.records_replayed, 3);

        let table = &tables["accounts"];
        assert_eq!(table.chain_count(), 2);
        assert_eq!(
            table.get(9, &snapshot(10), &clog).unwrap().get("balance"),
            Some(&Value::Int(900))
        );
    }

    #[test]
    fn test_aborted_transaction_stays_invisible() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer
                .append(WalRecord::insert_row(1, "accounts", 1, account_row(1, 100)))
                .unwrap();
            writer.append(WalRecord::abort_tx(1)).unwrap();
            writer.flush().unwrap();
        }

        let mut tables = fresh_tables();
        let clog = CommitLog::new();
        replay(dir.path(), 0, &mut tables, &clog).unwrap();

        assert_eq!(clog.status(1), TxStatus::Aborted);
        assert!(tables["accounts"].get(1, &snapshot(10), &clog).is_none());
    }

    #[test]
    fn test_tail_truncation_restores_pre_record_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), 1 << 20).unwrap();
            writer.append(WalRecord::begin_tx(1)).unwrap();
            writer
                .append(WalRecord::insert_row(1, "accounts", 1, account_row(1, 100)))
                .unwrap();
            writer.append(WalRecord::commit_tx(1)).unwrap();
            writer.flush().unwrap();
        }

        // Truncate a suffix of the final (commit) record: the replayed
        // state is exactly the pre-commit state, so the insert aborts.
        let segments = crate::wal::writer::list_segments(dir.path()).unwrap();
        let (_, path) = segments.last().unwrap();
        let data = std::fs::read(path).unwrap();
        std::fs::write(path, &data[..data.len() - 5]).unwrap();

        let mut tables = fresh_tables();
        let clog = CommitLog::new();
        let outcome = replay(dir.path(), 0, &mut tables, &clog).unwrap();
        assert_eq!(outcome.records_replayed, 2);
        assert_eq!(outcome.txns_aborted, 1);
        assert!(tables["accounts"].get(1, &snapshot(10), &clog).is_none());
    }
}
