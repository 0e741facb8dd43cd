//! Database handle
//!
//! Owns the tables, transaction manager, commit log, WAL and indexes,
//! and drives statements through parse → validate → execute. Statements
//! outside an explicit transaction run in an implicit one that commits
//! (or rolls back) with the statement. Closing the handle runs a final
//! checkpoint when configured and always flushes the WAL.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DbConfig;
use crate::database::persistence::{
    load_catalog, load_table, save_catalog, save_table_compact, save_table_mvcc, Catalog,
    TABLE_FILE_EXT,
};
use crate::error::{DbError, Result};
use crate::index::IndexManager;
use crate::mvcc::{vacuum_table, Table, VacuumStats};
use crate::sql::{self, ExecutorCtx, QueryResult, Statement, Validator};
use crate::txn::{CommitLog, TransactionManager, WriteOp};
use crate::types::{Lsn, RowId, TxId};
use crate::wal::{self, WalRecord, WalWriter};

pub struct Database {
    dir: PathBuf,
    config: DbConfig,
    tables: BTreeMap<String, Table>,
    clog: Arc<CommitLog>,
    txn: TransactionManager,
    indexes: IndexManager,
    wal: WalWriter,
    /// Explicit transaction opened by BEGIN, if any.
    current_tx: Option<TxId>,
    checkpoint_lsn: Lsn,
    commits_since_vacuum: usize,
    closed: bool,
}

impl Database {
    /// Open (or create) a database in `dir`: load the last persisted
    /// table images and CLOG, replay the WAL past the checkpoint,
    /// rebuild indexes, and resume the txid/LSN counters.
    pub fn open(dir: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let wal_dir = dir.join("wal");

        let catalog = {
            let path = dir.join("catalog.json");
            if path.exists() {
                load_catalog(&path)?
            } else {
                Catalog::default()
            }
        };

        let clog_path = dir.join("clog");
        let clog = Arc::new(if clog_path.exists() {
            CommitLog::load(&clog_path)?
        } else {
            CommitLog::new()
        });

        let mut tables = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXT) {
                let table = load_table(&path, config.mvcc_enabled)?;
                tables.insert(table.name.clone(), table);
            }
        }

        // The writer truncates a damaged tail before the reader replays.
        let wal_writer = WalWriter::open(&wal_dir, config.wal.max_file_size)?;
        let outcome = wal::replay(&wal_dir, catalog.checkpoint_lsn, &mut tables, &clog)?;

        let txn = TransactionManager::new(clog.clone());
        txn.seed_txid(outcome.max_txid.max(clog.max_known_txid()) + 1);

        let indexes = IndexManager::new();
        indexes.register_from_metadata(catalog.indexes.clone());
        let snapshot = txn.latest_snapshot();
        {
            let table_names: Vec<String> = tables.keys().cloned().collect();
            let tables_ref = &tables;
            let clog_ref = clog.as_ref();
            let visible = move |name: &str| -> Vec<(RowId, crate::types::Row)> {
                tables_ref
                    .get(name)
                    .map(|t| {
                        t.visible_row_ids(&snapshot, clog_ref)
                            .into_iter()
                            .filter_map(|id| t.get(id, &snapshot, clog_ref).map(|r| (id, r)))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            indexes.rebuild_btrees(&visible);
            indexes.rebuild_vectors(&table_names, &visible);
        }

        info!(
            dir = %dir.display(),
            tables = tables.len(),
            replayed = outcome.records_replayed,
            aborted = outcome.txns_aborted,
            "database opened"
        );

        Ok(Self {
            dir,
            config,
            tables,
            clog,
            txn,
            indexes,
            wal: wal_writer,
            current_tx: None,
            checkpoint_lsn: catalog.checkpoint_lsn,
            commits_since_vacuum: 0,
            closed: false,
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.txn
    }

    /// Parse, validate and execute one SQL statement.
    pub fn execute(&mut self, sql_text: &str) -> Result<QueryResult> {
        let stmt = sql::parse(sql_text)?;
        Validator::new(&self.tables, self.config.validation_mode).validate(&stmt)?;

        match stmt {
            Statement::Begin => {
                if self.current_tx.is_some() {
                    return Err(DbError::TransactionAlreadyActive);
                }
                let txid = self.txn.begin();
                self.current_tx = Some(txid);
                debug!(txid, "transaction started");
                Ok(QueryResult::Transaction {
                    message: format!("transaction {} started", txid),
                })
            }
            Statement::Commit => {
                let txid = self.current_tx.take().ok_or(DbError::NoActiveTransaction)?;
                self.commit_tx(txid)?;
                Ok(QueryResult::Transaction {
                    message: format!("transaction {} committed", txid),
                })
            }
            Statement::Rollback => {
                let txid = self.current_tx.take().ok_or(DbError::NoActiveTransaction)?;
                self.rollback_tx(txid)?;
                Ok(QueryResult::Transaction {
                    message: format!("transaction {} rolled back", txid),
                })
            }
            other => self.execute_statement(&other),
        }
    }

    fn execute_statement(&mut self, stmt: &Statement) -> Result<QueryResult> {
        let (txid, implicit) = match self.current_tx {
            Some(txid) => (txid, false),
            None => (self.txn.begin(), true),
        };
        let snapshot = self
            .txn
            .snapshot_of(txid)
            .ok_or(DbError::NoActiveTransaction)?;

        let result = {
            let mut ctx = ExecutorCtx {
                tables: &mut self.tables,
                txn: &self.txn,
                indexes: &self.indexes,
                wal: &mut self.wal,
                snapshot,
                txid,
                mvcc_enabled: self.config.mvcc_enabled,
            };
            ctx.execute(stmt)
        };

        match result {
            Ok(output) => {
                if implicit {
                    self.commit_tx(txid)?;
                }
                self.persist_ddl(stmt)?;
                if matches!(stmt, Statement::Vacuum { .. }) {
                    self.commits_since_vacuum = 0;
                }
                Ok(output)
            }
            Err(e) => {
                // The executor already unwound the statement's partial
                // work; an implicit transaction has nothing else in it.
                if implicit {
                    let _ = self.rollback_tx(txid);
                }
                Err(e)
            }
        }
    }

    /// Durably commit: the commit record is fsynced before the caller is
    /// told "committed". Read-only transactions skip the log entirely.
    fn commit_tx(&mut self, txid: TxId) -> Result<()> {
        if self.txn.is_wal_logged(txid) {
            self.wal.append(WalRecord::commit_tx(txid))?;
            if self.config.wal.sync_on_commit {
                self.wal.flush()?;
            }
        }
        self.txn.commit(txid)?;
        self.commits_since_vacuum += 1;
        self.maybe_auto_vacuum();
        Ok(())
    }

    /// Abort and unwind: aborted chain versions stay for VACUUM, but
    /// same-transaction fresh inserts are physically dropped and index
    /// side effects are reversed.
    fn rollback_tx(&mut self, txid: TxId) -> Result<()> {
        if self.txn.is_wal_logged(txid) {
            self.wal.append(WalRecord::abort_tx(txid))?;
        }
        let tx = self.txn.rollback(txid)?;

        for op in tx.writes.iter().rev() {
            match op {
                WriteOp::Insert { table, row_id, row } => {
                    if let Some(t) = self.tables.get_mut(table) {
                        let fresh = t
                            .head(*row_id)
                            .map(|h| h.xmin == txid && h.next.is_none())
                            .unwrap_or(false);
                        if fresh {
                            t.physical_delete(*row_id);
                            let columns = t.columns().to_vec();
                            self.indexes.remove_row_entries(table, *row_id, row, &columns);
                        }
                    }
                }
                WriteOp::Update {
                    table,
                    row_id,
                    old_row,
                    new_row,
                } => {
                    if let Some(t) = self.tables.get(table) {
                        let columns = t.columns().to_vec();
                        self.indexes
                            .undo_update(table, *row_id, old_row, new_row, &columns);
                    }
                }
                WriteOp::Delete { table, row_id, row } => {
                    if let Some(t) = self.tables.get(table) {
                        let columns = t.columns().to_vec();
                        self.indexes.undo_delete(table, *row_id, row, &columns);
                    }
                }
            }
        }
        Ok(())
    }

    /// DDL durability: schema changes are persisted as soon as they
    /// land, so recovery always has a schema to replay row records into.
    fn persist_ddl(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::CreateTable(create) => self.save_table(&create.table),
            Statement::AlterTable(alter) => {
                self.save_table(&alter.table)?;
                self.save_index_catalog()
            }
            Statement::DropTable { table, .. } => {
                let path = self.table_path(table);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                self.save_index_catalog()
            }
            Statement::CreateIndex(_) | Statement::DropIndex { .. } => self.save_index_catalog(),
            _ => Ok(()),
        }
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, TABLE_FILE_EXT))
    }

    fn save_table(&self, name: &str) -> Result<()> {
        let table = match self.tables.get(name) {
            Some(table) => table,
            None => return Ok(()),
        };
        let path = self.table_path(name);
        if self.config.mvcc_enabled {
            save_table_mvcc(table, &path)
        } else {
            let snapshot = self.txn.latest_snapshot();
            save_table_compact(table, &snapshot, &self.clog, &path)
        }
    }

    fn save_index_catalog(&self) -> Result<()> {
        save_catalog(
            &self.dir.join("catalog.json"),
            &Catalog {
                checkpoint_lsn: self.checkpoint_lsn,
                indexes: self.indexes.metadata(),
            },
        )
    }

    fn maybe_auto_vacuum(&mut self) {
        if !self.config.auto_vacuum.enabled {
            return;
        }
        let max_chain = self
            .tables
            .values()
            .map(|t| t.max_chain_length())
            .max()
            .unwrap_or(0);
        let by_chain = max_chain > self.config.auto_vacuum.max_chain_length;
        let by_interval = self.commits_since_vacuum > self.config.auto_vacuum.txn_interval;
        if by_chain || by_interval {
            debug!(max_chain, by_interval, "auto-vacuum triggered");
            let _ = self.vacuum_all();
        }
    }

    /// Vacuum every table and shed dead B-tree entries.
    pub fn vacuum_all(&mut self) -> Result<Vec<VacuumStats>> {
        let horizon = self.txn.oldest_live_snapshot_txid().unwrap_or(u64::MAX);
        let mut stats = Vec::new();
        for table in self.tables.values_mut() {
            stats.push(vacuum_table(table, &self.clog, horizon));
        }

        let snapshot = self.txn.latest_snapshot();
        let tables_ref = &self.tables;
        let clog_ref = self.clog.as_ref();
        self.indexes.rebuild_btrees(&move |name: &str| {
            tables_ref
                .get(name)
                .map(|t| {
                    t.visible_row_ids(&snapshot, clog_ref)
                        .into_iter()
                        .filter_map(|id| t.get(id, &snapshot, clog_ref).map(|r| (id, r)))
                        .collect()
                })
                .unwrap_or_default()
        });

        self.commits_since_vacuum = 0;
        Ok(stats)
    }

    /// Write a checkpoint: a WAL marker, then table images and the CLOG
    /// keyed by its LSN. Recovery skips everything at or before it.
    pub fn checkpoint(&mut self) -> Result<Lsn> {
        let lsn = self.wal.checkpoint()?;
        let names: Vec<String> = self.tables.keys().cloned().collect();
        for name in names {
            self.save_table(&name)?;
        }
        self.clog.save(&self.dir.join("clog"))?;
        self.checkpoint_lsn = lsn;
        self.save_index_catalog()?;
        info!(lsn, "checkpoint complete");
        Ok(lsn)
    }

    /// Close the handle: final checkpoint when configured, then a WAL
    /// flush either way.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(txid) = self.current_tx.take() {
            self.rollback_tx(txid)?;
        }
        if self.config.checkpoint_on_close {
            self.checkpoint()?;
        }
        self.wal.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
