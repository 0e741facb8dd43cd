//! MVCC table
//!
//! A table owns its version chains, keyed by row id. Writers prepend new
//! versions; readers walk chains under snapshot visibility. In
//! MVCC-disabled mode each row keeps a single in-place version.

use std::collections::BTreeMap;

use crate::error::{DbError, Result};
use crate::mvcc::{is_visible, RowVersion};
use crate::txn::{CommitLog, Snapshot, TxStatus};
use crate::types::{Column, Row, RowId, TxId, Value};

pub struct Table {
    pub name: String,
    columns: Vec<Column>,
    /// Row id → chain head (newest version). BTreeMap iteration order is
    /// ascending row id, which equals insertion order because ids are
    /// assigned monotonically; scans rely on this.
    chains: BTreeMap<RowId, RowVersion>,
    next_row_id: RowId,
    mvcc_enabled: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, mvcc_enabled: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            chains: BTreeMap::new(),
            next_row_id: 1,
            mvcc_enabled,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn mvcc_enabled(&self) -> bool {
        self.mvcc_enabled
    }

    pub fn next_row_id(&self) -> RowId {
        self.next_row_id
    }

    pub fn set_next_row_id(&mut self, next: RowId) {
        self.next_row_id = next;
    }

    /// Create a new chain with a fresh row id. The caller has already
    /// coerced values against the schema.
    pub fn insert(&mut self, row: Row, txid: TxId) -> RowId {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.chains
            .insert(row_id, RowVersion::new_head(row_id, row, txid));
        row_id
    }

    /// Recreate a chain head with a recorded row id (WAL replay and
    /// compact-format load).
    pub fn replay_insert(&mut self, row_id: RowId, row: Row, txid: TxId) {
        self.chains
            .insert(row_id, RowVersion::new_head(row_id, row, txid));
        if row_id >= self.next_row_id {
            self.next_row_id = row_id + 1;
        }
    }

    /// WAL replay: apply an update with the recorded txid, bypassing the
    /// write-conflict check (conflicts were resolved in the original
    /// execution order).
    pub fn replay_update(&mut self, row_id: RowId, column: &str, new_value: Value, txid: TxId) {
        if let Some(mut old_head) = self.chains.remove(&row_id) {
            if !self.mvcc_enabled {
                old_head.row.set(column, new_value);
                self.chains.insert(row_id, old_head);
                return;
            }
            let mut new_row = old_head.row.deep_clone();
            new_row.set(column, new_value);
            old_head.xmax = txid;
            let new_head = RowVersion {
                row_id,
                xmin: txid,
                xmax: 0,
                row: new_row,
                next: Some(Box::new(old_head)),
            };
            self.chains.insert(row_id, new_head);
        }
    }

    /// WAL replay: re-apply a delete with the recorded txid.
    pub fn replay_delete(&mut self, row_id: RowId, txid: TxId) {
        if !self.mvcc_enabled {
            self.chains.remove(&row_id);
            return;
        }
        if let Some(head) = self.chains.get_mut(&row_id) {
            head.xmax = txid;
        }
    }

    /// Install a fully materialized chain (full-MVCC-format load).
    pub fn install_chain(&mut self, head: RowVersion) {
        let row_id = head.row_id;
        self.chains.insert(row_id, head);
        if row_id >= self.next_row_id {
            self.next_row_id = row_id + 1;
        }
    }

    fn check_write_conflict(
        &self,
        version: &RowVersion,
        txid: TxId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> Result<()> {
        if version.xmax == 0 || version.xmax == txid {
            return Ok(());
        }
        match clog.status(version.xmax) {
            // First committer wins: a supersede that committed at or
            // after our snapshot conflicts with our update.
            TxStatus::Committed => {
                if clog.commit_timestamp(version.xmax) >= snapshot.timestamp {
                    return Err(DbError::WriteConflict {
                        row_id: version.row_id,
                    });
                }
                Ok(())
            }
            // Another live transaction holds the tombstone.
            TxStatus::InProgress => Err(DbError::WriteConflict {
                row_id: version.row_id,
            }),
            // An aborted supersede never blocks; the new writer takes
            // over the xmax slot.
            TxStatus::Aborted => Ok(()),
        }
    }

    /// Number of chain hops from the head to the newest version whose
    /// creator did not abort. Aborted versions linger at the head until
    /// VACUUM and must not serve as the base of new writes.
    fn live_base_hops(head: &RowVersion, clog: &CommitLog) -> usize {
        let mut hops = 0;
        let mut cur = head;
        while cur.xmin != 0 && clog.is_aborted(cur.xmin) {
            match cur.next.as_deref() {
                Some(next) => {
                    cur = next;
                    hops += 1;
                }
                None => break,
            }
        }
        hops
    }

    /// Supersede the head with a new version that has one column
    /// replaced. The old head keeps the chain invariant: its xmax becomes
    /// the new version's xmin.
    pub fn update(
        &mut self,
        row_id: RowId,
        column: &str,
        new_value: Value,
        txid: TxId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> Result<()> {
        if !self.mvcc_enabled {
            let head = self
                .chains
                .get_mut(&row_id)
                .ok_or_else(|| DbError::Query(format!("row {} not found", row_id)))?;
            if !head.row.set(column, new_value) {
                return Err(DbError::Query(format!("column '{}' not found", column)));
            }
            return Ok(());
        }

        let old_head = self
            .chains
            .remove(&row_id)
            .ok_or_else(|| DbError::Query(format!("row {} not found", row_id)))?;

        // Clone from the newest non-aborted version, not a lingering
        // aborted head, or an aborted write would be resurrected.
        let base = {
            let hops = Self::live_base_hops(&old_head, clog);
            let mut base = &old_head;
            for _ in 0..hops {
                if let Some(next) = base.next.as_deref() {
                    base = next;
                }
            }
            base
        };
        if let Err(e) = self.check_write_conflict(base, txid, snapshot, clog) {
            self.chains.insert(row_id, old_head);
            return Err(e);
        }

        let mut new_row = base.row.deep_clone();
        if !new_row.set(column, new_value) {
            self.chains.insert(row_id, old_head);
            return Err(DbError::Query(format!("column '{}' not found", column)));
        }

        let mut old_head = old_head;
        old_head.xmax = txid;
        let new_head = RowVersion {
            row_id,
            xmin: txid,
            xmax: 0,
            row: new_row,
            next: Some(Box::new(old_head)),
        };
        self.chains.insert(row_id, new_head);
        Ok(())
    }

    /// Mark the head deleted by `txid`. No new version is produced.
    pub fn delete(
        &mut self,
        row_id: RowId,
        txid: TxId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> Result<()> {
        if !self.mvcc_enabled {
            self.chains
                .remove(&row_id)
                .ok_or_else(|| DbError::Query(format!("row {} not found", row_id)))?;
            return Ok(());
        }

        let head = self
            .chains
            .get(&row_id)
            .ok_or_else(|| DbError::Query(format!("row {} not found", row_id)))?;
        // The tombstone lands on the newest non-aborted version; marking
        // a lingering aborted head would leave the live version exposed.
        let hops = Self::live_base_hops(head, clog);
        let mut target = head;
        for _ in 0..hops {
            if let Some(next) = target.next.as_deref() {
                target = next;
            }
        }
        self.check_write_conflict(target, txid, snapshot, clog)?;

        if let Some(head) = self.chains.get_mut(&row_id) {
            let mut target = head;
            for _ in 0..hops {
                match target.next.as_deref_mut() {
                    Some(next) => target = next,
                    None => break,
                }
            }
            target.xmax = txid;
        }
        Ok(())
    }

    /// First visible version under the snapshot, walking newest to
    /// oldest.
    pub fn get(&self, row_id: RowId, snapshot: &Snapshot, clog: &CommitLog) -> Option<Row> {
        let head = self.chains.get(&row_id)?;
        if !self.mvcc_enabled {
            return Some(head.row.clone());
        }
        head.iter()
            .find(|v| is_visible(v, snapshot, clog))
            .map(|v| v.row.clone())
    }

    /// Row ids whose chains contain at least one visible version, in
    /// chain-head insertion order. MVCC-disabled mode returns every head
    /// unfiltered.
    pub fn visible_row_ids(&self, snapshot: &Snapshot, clog: &CommitLog) -> Vec<RowId> {
        if !self.mvcc_enabled {
            return self.chains.keys().copied().collect();
        }
        self.chains
            .iter()
            .filter(|(_, head)| head.iter().any(|v| is_visible(v, snapshot, clog)))
            .map(|(row_id, _)| *row_id)
            .collect()
    }

    /// Unconditionally drop a chain. Only rollback of a same-transaction
    /// fresh insert uses this.
    pub fn physical_delete(&mut self, row_id: RowId) -> Option<RowVersion> {
        self.chains.remove(&row_id)
    }

    /// Scoped-rollback helper: pop a head created by `txid` and restore
    /// the previous head as live. Used when an index update fails midway
    /// through a statement.
    pub fn undo_update(&mut self, row_id: RowId, txid: TxId) {
        if let Some(head) = self.chains.remove(&row_id) {
            if head.xmin == txid {
                if let Some(mut prev) = head.next {
                    prev.xmax = 0;
                    self.chains.insert(row_id, *prev);
                }
                return;
            }
            self.chains.insert(row_id, head);
        }
    }

    /// Scoped-rollback helper: clear a tombstone set by `txid`, wherever
    /// in the chain it landed.
    pub fn undo_delete(&mut self, row_id: RowId, txid: TxId) {
        if let Some(head) = self.chains.get_mut(&row_id) {
            let mut cur = Some(head);
            while let Some(version) = cur {
                if version.xmax == txid {
                    version.xmax = 0;
                    return;
                }
                cur = version.next.as_deref_mut();
            }
        }
    }

    pub fn head(&self, row_id: RowId) -> Option<&RowVersion> {
        self.chains.get(&row_id)
    }

    pub fn chain_len(&self, row_id: RowId) -> usize {
        self.chains.get(&row_id).map(|h| h.chain_len()).unwrap_or(0)
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn total_versions(&self) -> usize {
        self.chains.values().map(|h| h.chain_len()).sum()
    }

    pub fn max_chain_length(&self) -> usize {
        self.chains
            .values()
            .map(|h| h.chain_len())
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn chains(&self) -> &BTreeMap<RowId, RowVersion> {
        &self.chains
    }

    pub(crate) fn chains_mut(&mut self) -> &mut BTreeMap<RowId, RowVersion> {
        &mut self.chains
    }

    /// Schema change: add a column, padding existing versions with NULL.
    pub fn add_column(&mut self, column: Column) {
        for head in self.chains.values_mut() {
            let mut cur = Some(head);
            while let Some(v) = cur {
                v.row.push(column.name.clone(), Value::Null);
                cur = v.next.as_deref_mut();
            }
        }
        self.columns.push(column);
    }

    /// Schema change: drop a column from the schema and every version.
    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| DbError::Query(format!("column '{}' not found", name)))?;
        self.columns.remove(idx);
        for head in self.chains.values_mut() {
            let mut cur = Some(head);
            while let Some(v) = cur {
                v.row.remove(name);
                cur = v.next.as_deref_mut();
            }
        }
        Ok(())
    }

    /// Schema change: rename a column everywhere.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        let idx = self
            .column_index(old)
            .ok_or_else(|| DbError::Query(format!("column '{}' not found", old)))?;
        self.columns[idx].name = new.to_string();
        for head in self.chains.values_mut() {
            let mut cur = Some(head);
            while let Some(v) = cur {
                v.row.rename(old, new);
                cur = v.next.as_deref_mut();
            }
        }
        Ok(())
    }
}
