//! Index manager
//!
//! Registry of B-tree indexes (by name) and HNSW vector indexes (by
//! embedding dimension). The executor drives it synchronously through
//! the on_insert/on_update/on_delete callbacks inside the same critical
//! section as the table mutation; a failure partway through a callback
//! unwinds the already-applied index work in reverse order before
//! propagating, so a statement either lands in every structure or none.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::types::{Column, Row, RowId, Value};

use super::btree::BTreeIndex;
use super::hnsw::HnswIndex;

/// Persisted description of one B-tree index (`catalog.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMetadata {
    pub name: String,
    pub table: String,
    pub column: String,
}

/// One applied index mutation, recorded so a failed statement can be
/// unwound in reverse order.
enum Applied {
    BTreeInsert { index: String, value: Value },
    HnswInsert { dim: usize },
    HnswRemove { dim: usize, vector: Vec<f32> },
}

#[derive(Default)]
pub struct IndexManager {
    btrees: DashMap<String, BTreeIndex>,
    hnsw: DashMap<usize, HnswIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a B-tree index and bulk-load its initial entries.
    pub fn create_btree(
        &self,
        name: &str,
        table: &str,
        column: &str,
        entries: Vec<(RowId, Value)>,
    ) -> Result<()> {
        if self.btrees.contains_key(name) {
            return Err(DbError::Query(format!("index '{}' already exists", name)));
        }
        let mut index = BTreeIndex::new(name, table, column);
        for (row_id, value) in entries {
            index.insert(&value, row_id);
        }
        debug!(index = name, table, column, "created btree index");
        self.btrees.insert(name.to_string(), index);
        Ok(())
    }

    pub fn drop_btree(&self, name: &str) -> Result<()> {
        self.btrees
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::Query(format!("index '{}' not found", name)))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.btrees.contains_key(name)
    }

    /// Row ids under `key` in the named index. Callers re-filter through
    /// snapshot visibility.
    pub fn query(&self, name: &str, key: &Value) -> Result<Vec<RowId>> {
        let index = self
            .btrees
            .get(name)
            .ok_or_else(|| DbError::Query(format!("index '{}' not found", name)))?;
        Ok(index.query(key))
    }

    /// Name of a B-tree index covering (table, column), if any.
    pub fn btree_for(&self, table: &str, column: &str) -> Option<String> {
        self.btrees
            .iter()
            .find(|e| e.value().table == table && e.value().column == column)
            .map(|e| e.key().clone())
    }

    fn btree_names_for_table(&self, table: &str) -> Vec<String> {
        self.btrees
            .iter()
            .filter(|e| e.value().table == table)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Ensure the per-dimension vector index exists.
    pub fn get_or_create_hnsw(&self, dim: usize) {
        self.hnsw.entry(dim).or_insert_with(|| HnswIndex::new(dim));
    }

    pub fn hnsw_search(&self, dim: usize, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        match self.hnsw.get(&dim) {
            Some(index) => index.search(query, k),
            None => Ok(Vec::new()),
        }
    }

    pub fn hnsw_len(&self, dim: usize) -> usize {
        self.hnsw.get(&dim).map(|i| i.len()).unwrap_or(0)
    }

    /// Insert into the index of the given dimension; the insert itself
    /// rejects a vector of the wrong length.
    fn hnsw_insert(&self, dim: usize, vector: &[f32], row_id: RowId) -> Result<()> {
        let mut index = self.hnsw.entry(dim).or_insert_with(|| HnswIndex::new(dim));
        index.insert(vector, row_id)?;
        Ok(())
    }

    fn hnsw_remove(&self, dim: usize, row_id: RowId) {
        if let Some(mut index) = self.hnsw.get_mut(&dim) {
            index.remove(row_id);
        }
    }

    /// The vector index a column routes to: its declared dimension, or
    /// the value's own length when the column leaves it open.
    fn route_dim(columns: &[Column], name: &str, vector: &[f32]) -> usize {
        columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.dimension)
            .unwrap_or(vector.len())
    }

    fn unwind(&self, row_id: RowId, applied: Vec<Applied>) {
        for op in applied.into_iter().rev() {
            match op {
                Applied::BTreeInsert { index, value } => {
                    if let Some(mut idx) = self.btrees.get_mut(&index) {
                        idx.remove(&value, row_id);
                    }
                }
                Applied::HnswInsert { dim } => self.hnsw_remove(dim, row_id),
                Applied::HnswRemove { dim, vector } => {
                    let _ = self.hnsw_insert(dim, &vector, row_id);
                }
            }
        }
    }

    /// Apply a freshly inserted row to every affected index. On failure
    /// the already-applied entries are removed in reverse order.
    pub fn on_insert(
        &self,
        table: &str,
        row_id: RowId,
        row: &Row,
        columns: &[Column],
    ) -> Result<()> {
        let mut applied: Vec<Applied> = Vec::new();

        for name in self.btree_names_for_table(table) {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                if let Some(value) = row.get(&index.column) {
                    let value = value.deep_clone();
                    index.insert(&value, row_id);
                    applied.push(Applied::BTreeInsert { index: name, value });
                }
            }
        }
        for (name, value) in row.iter() {
            if let Value::Embedding(vector) = value {
                let dim = Self::route_dim(columns, name, vector);
                if let Err(e) = self.hnsw_insert(dim, vector, row_id) {
                    self.unwind(row_id, applied);
                    return Err(e);
                }
                applied.push(Applied::HnswInsert { dim });
            }
        }
        Ok(())
    }

    /// Index a new row version. B-tree entries for the old version are
    /// retained: a snapshot that still sees the old version must still
    /// find it by its old key (readers re-verify value and visibility on
    /// fetch; VACUUM sheds dead entries via rebuild). The vector graph
    /// keeps one entry per row and is swapped in place.
    pub fn on_update(
        &self,
        table: &str,
        row_id: RowId,
        old_row: &Row,
        new_row: &Row,
        columns: &[Column],
    ) -> Result<()> {
        let mut applied: Vec<Applied> = Vec::new();

        for name in self.btree_names_for_table(table) {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                let column = index.column.clone();
                let changed = match (old_row.get(&column), new_row.get(&column)) {
                    (Some(old), Some(new)) => old.compare(new) != Some(std::cmp::Ordering::Equal),
                    (None, Some(_)) => true,
                    _ => false,
                };
                if changed {
                    if let Some(new) = new_row.get(&column) {
                        let new = new.deep_clone();
                        index.insert(&new, row_id);
                        applied.push(Applied::BTreeInsert { index: name, value: new });
                    }
                }
            }
        }

        for (name, value) in new_row.iter() {
            if let Value::Embedding(new_vec) = value {
                let old_vec = match old_row.get(name) {
                    Some(Value::Embedding(v)) => Some(v.clone()),
                    _ => None,
                };
                if old_vec.as_deref() == Some(new_vec.as_slice()) {
                    continue;
                }
                let dim = Self::route_dim(columns, name, new_vec);
                if let Some(old_vec) = old_vec {
                    let old_dim = Self::route_dim(columns, name, &old_vec);
                    self.hnsw_remove(old_dim, row_id);
                    applied.push(Applied::HnswRemove {
                        dim: old_dim,
                        vector: old_vec,
                    });
                }
                if let Err(e) = self.hnsw_insert(dim, new_vec, row_id) {
                    self.unwind(row_id, applied);
                    return Err(e);
                }
                applied.push(Applied::HnswInsert { dim });
            }
        }
        Ok(())
    }

    /// A delete keeps the B-tree entries (older snapshots still reach
    /// the row through them) and drops the row's vectors.
    pub fn on_delete(&self, _table: &str, row_id: RowId, row: &Row, columns: &[Column]) {
        for (name, value) in row.iter() {
            if let Value::Embedding(vector) = value {
                let dim = Self::route_dim(columns, name, vector);
                self.hnsw_remove(dim, row_id);
            }
        }
    }

    /// Strip every index entry of one row. Used when an insert is rolled
    /// back: the chain is physically gone, so its keys must go too.
    pub fn remove_row_entries(&self, table: &str, row_id: RowId, row: &Row, columns: &[Column]) {
        for name in self.btree_names_for_table(table) {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                let column = index.column.clone();
                if let Some(value) = row.get(&column) {
                    index.remove(&value.clone(), row_id);
                }
            }
        }
        for (name, value) in row.iter() {
            if let Value::Embedding(vector) = value {
                let dim = Self::route_dim(columns, name, vector);
                self.hnsw_remove(dim, row_id);
            }
        }
    }

    /// Transaction rollback of an update: the aborted new version is
    /// invisible to everyone, so its B-tree keys are pure garbage and
    /// come out; the old vector goes back into the graph.
    pub fn undo_update(
        &self,
        table: &str,
        row_id: RowId,
        old_row: &Row,
        new_row: &Row,
        columns: &[Column],
    ) {
        for name in self.btree_names_for_table(table) {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                let column = index.column.clone();
                let changed = match (old_row.get(&column), new_row.get(&column)) {
                    (Some(old), Some(new)) => old.compare(new) != Some(std::cmp::Ordering::Equal),
                    (None, Some(_)) => true,
                    _ => false,
                };
                if changed {
                    if let Some(new) = new_row.get(&column) {
                        index.remove(&new.clone(), row_id);
                    }
                }
            }
        }
        for (name, value) in new_row.iter() {
            if let Value::Embedding(new_vec) = value {
                let old_vec = match old_row.get(name) {
                    Some(Value::Embedding(v)) => Some(v.clone()),
                    _ => None,
                };
                if old_vec.as_deref() == Some(new_vec.as_slice()) {
                    continue;
                }
                self.hnsw_remove(Self::route_dim(columns, name, new_vec), row_id);
                if let Some(old_vec) = old_vec {
                    let dim = Self::route_dim(columns, name, &old_vec);
                    let _ = self.hnsw_insert(dim, &old_vec, row_id);
                }
            }
        }
    }

    /// Transaction rollback of a delete: the row is live again, so its
    /// vectors return (B-tree entries were never removed).
    pub fn undo_delete(&self, _table: &str, row_id: RowId, row: &Row, columns: &[Column]) {
        for (name, value) in row.iter() {
            if let Value::Embedding(vector) = value {
                let dim = Self::route_dim(columns, name, vector);
                let _ = self.hnsw_insert(dim, vector, row_id);
            }
        }
    }

    /// Drop every index belonging to a table, plus the table's vectors.
    pub fn drop_table(&self, table: &str, rows: &[(RowId, Row)], columns: &[Column]) {
        for name in self.btree_names_for_table(table) {
            self.btrees.remove(&name);
        }
        for (row_id, row) in rows {
            for (name, value) in row.iter() {
                if let Value::Embedding(vector) = value {
                    let dim = Self::route_dim(columns, name, vector);
                    self.hnsw_remove(dim, *row_id);
                }
            }
        }
    }

    /// Drop every B-tree index over one column (ALTER TABLE DROP COLUMN).
    pub fn drop_btrees_for_column(&self, table: &str, column: &str) {
        let names: Vec<String> = self
            .btrees
            .iter()
            .filter(|e| e.value().table == table && e.value().column == column)
            .map(|e| e.key().clone())
            .collect();
        for name in names {
            self.btrees.remove(&name);
        }
    }

    /// Follow a column rename (ALTER TABLE RENAME COLUMN).
    pub fn rename_column(&self, table: &str, old: &str, new: &str) {
        let names: Vec<String> = self
            .btrees
            .iter()
            .filter(|e| e.value().table == table && e.value().column == old)
            .map(|e| e.key().clone())
            .collect();
        for name in names {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                index.column = new.to_string();
            }
        }
    }

    pub fn metadata(&self) -> Vec<IndexMetadata> {
        let mut metas: Vec<IndexMetadata> = self
            .btrees
            .iter()
            .map(|e| IndexMetadata {
                name: e.value().name.clone(),
                table: e.value().table.clone(),
                column: e.value().column.clone(),
            })
            .collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
    }

    /// Register empty indexes from persisted metadata; `rebuild` fills
    /// them from table data afterwards.
    pub fn register_from_metadata(&self, metas: Vec<IndexMetadata>) {
        for meta in metas {
            self.btrees.insert(
                meta.name.clone(),
                BTreeIndex::new(meta.name, meta.table, meta.column),
            );
        }
    }

    /// Rebuild every B-tree from visible table state by scan. Called at
    /// the end of recovery.
    pub fn rebuild_btrees(&self, visible_rows: &dyn Fn(&str) -> Vec<(RowId, Row)>) {
        let names: Vec<String> = self.btrees.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some(mut index) = self.btrees.get_mut(&name) {
                index.clear();
                let table = index.table.clone();
                let column = index.column.clone();
                for (row_id, row) in visible_rows(&table) {
                    if let Some(value) = row.get(&column) {
                        index.insert(&value.clone(), row_id);
                    }
                }
            }
        }
    }

    /// Rebuild the per-dimension vector graphs by re-inserting every
    /// embedding value of every visible head.
    pub fn rebuild_vectors(
        &self,
        table_names: &[String],
        visible_rows: &dyn Fn(&str) -> Vec<(RowId, Row)>,
    ) {
        self.hnsw.clear();
        for table in table_names {
            for (row_id, row) in visible_rows(table) {
                for (_, value) in row.iter() {
                    if let Value::Embedding(vector) = value {
                        // Rows that passed schema coercion cannot mismatch
                        // their own length-keyed index.
                        let _ = self.hnsw_insert(vector.len(), vector, row_id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn user_columns() -> Vec<Column> {
        vec![
            Column::new("id", DataType::Int),
            Column::new("email", DataType::Text),
        ]
    }

    fn row_with_email(id: i64, email: &str) -> Row {
        let mut row = Row::new();
        row.push("id", Value::Int(id));
        row.push("email", Value::Text(email.into()));
        row
    }

    #[test]
    fn test_create_query_drop() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();
        assert!(mgr.has_index("idx_email"));
        assert!(mgr
            .create_btree("idx_email", "users", "email", vec![])
            .is_err());

        mgr.on_insert(
            "users",
            1,
            &row_with_email(1, "test@example.com"),
            &user_columns(),
        )
        .unwrap();
        assert_eq!(
            mgr.query("idx_email", &Value::Text("test@example.com".into()))
                .unwrap(),
            vec![1]
        );

        mgr.drop_btree("idx_email").unwrap();
        assert!(mgr.query("idx_email", &Value::Null).is_err());
    }

    #[test]
    fn test_update_retains_old_entry_and_adds_new() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();
        let old = row_with_email(1, "old@x.com");
        let new = row_with_email(1, "new@x.com");
        mgr.on_insert("users", 1, &old, &user_columns()).unwrap();
        mgr.on_update("users", 1, &old, &new, &user_columns()).unwrap();

        // Old snapshots still reach the row by its old key; readers
        // re-verify the fetched value.
        assert_eq!(
            mgr.query("idx_email", &Value::Text("old@x.com".into()))
                .unwrap(),
            vec![1]
        );
        assert_eq!(
            mgr.query("idx_email", &Value::Text("new@x.com".into()))
                .unwrap(),
            vec![1]
        );
    }

    #[test]
    fn test_undo_update_strips_aborted_key() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();
        let old = row_with_email(1, "old@x.com");
        let new = row_with_email(1, "new@x.com");
        mgr.on_insert("users", 1, &old, &user_columns()).unwrap();
        mgr.on_update("users", 1, &old, &new, &user_columns()).unwrap();

        mgr.undo_update("users", 1, &old, &new, &user_columns());
        assert!(mgr
            .query("idx_email", &Value::Text("new@x.com".into()))
            .unwrap()
            .is_empty());
        assert_eq!(
            mgr.query("idx_email", &Value::Text("old@x.com".into()))
                .unwrap(),
            vec![1]
        );
    }

    #[test]
    fn test_delete_keeps_btree_entry_drops_vector() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();
        let mut columns = user_columns();
        columns.push(Column::embedding("vec", 2));
        let mut row = row_with_email(1, "a@x.com");
        row.push("vec", Value::Embedding(vec![0.5, 0.5]));

        mgr.on_insert("users", 1, &row, &columns).unwrap();
        mgr.on_delete("users", 1, &row, &columns);

        // B-tree entry survives for older snapshots; the vector is gone.
        assert_eq!(
            mgr.query("idx_email", &Value::Text("a@x.com".into()))
                .unwrap(),
            vec![1]
        );
        assert_eq!(mgr.hnsw_len(2), 0);
    }

    #[test]
    fn test_remove_row_entries_clears_everything() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();
        let row = row_with_email(1, "a@x.com");
        mgr.on_insert("users", 1, &row, &user_columns()).unwrap();
        mgr.remove_row_entries("users", 1, &row, &user_columns());
        assert!(mgr
            .query("idx_email", &Value::Text("a@x.com".into()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_failed_hnsw_insert_unwinds_btree_entries() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();

        // Declared dimension 3, actual vector dimension 2: the vector
        // insert fails after the btree entry landed, and the unwind must
        // take the btree entry back out.
        let columns = vec![
            Column::new("email", DataType::Text),
            Column::embedding("vec", 3),
        ];
        let mut row = row_with_email(1, "a@x.com");
        row.push("vec", Value::Embedding(vec![1.0, 2.0]));

        let err = mgr.on_insert("users", 1, &row, &columns).unwrap_err();
        assert!(matches!(err, DbError::DimensionMismatch { .. }));
        assert!(mgr
            .query("idx_email", &Value::Text("a@x.com".into()))
            .unwrap()
            .is_empty());
        assert_eq!(mgr.hnsw_len(3), 0);
    }

    #[test]
    fn test_failed_hnsw_update_restores_old_state() {
        let mgr = IndexManager::new();
        let columns = vec![Column::embedding("vec", 2)];

        let mut old = Row::new();
        old.push("vec", Value::Embedding(vec![1.0, 0.0]));
        mgr.on_insert("t", 1, &old, &columns).unwrap();

        let mut new = Row::new();
        new.push("vec", Value::Embedding(vec![1.0, 0.0, 0.0]));
        let err = mgr.on_update("t", 1, &old, &new, &columns).unwrap_err();
        assert!(matches!(err, DbError::DimensionMismatch { .. }));

        // The old vector is back in its index.
        let hits = mgr.hnsw_search(2, &[1.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_hnsw_per_dimension_registry() {
        let mgr = IndexManager::new();
        let cols2 = vec![Column::embedding("vec", 2)];
        let cols3 = vec![Column::embedding("vec", 3)];
        let mut row2 = Row::new();
        row2.push("vec", Value::Embedding(vec![0.0, 1.0]));
        let mut row3 = Row::new();
        row3.push("vec", Value::Embedding(vec![0.0, 1.0, 2.0]));

        mgr.on_insert("a", 1, &row2, &cols2).unwrap();
        mgr.on_insert("b", 2, &row3, &cols3).unwrap();
        assert_eq!(mgr.hnsw_len(2), 1);
        assert_eq!(mgr.hnsw_len(3), 1);

        let hits = mgr.hnsw_search(2, &[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_rebuild_from_scan() {
        let mgr = IndexManager::new();
        mgr.create_btree("idx_email", "users", "email", vec![]).unwrap();

        let rows = vec![
            (1u64, row_with_email(1, "a@x.com")),
            (2u64, row_with_email(2, "b@x.com")),
        ];
        let rows_for = move |table: &str| -> Vec<(RowId, Row)> {
            if table == "users" {
                rows.clone()
            } else {
                Vec::new()
            }
        };
        mgr.rebuild_btrees(&rows_for);
        assert_eq!(
            mgr.query("idx_email", &Value::Text("b@x.com".into()))
                .unwrap(),
            vec![2]
        );
    }
}
