//! Ordered secondary index
//!
//! Maps column values to the set of row ids carrying them. The index is
//! acceleration only: every returned row id must still pass snapshot
//! visibility in the executor, and the whole structure is regenerable
//! from table data.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{RowId, Value};

/// Total-order wrapper over `Value` for use as a B-tree key. Ordering
/// follows `Value::sort_cmp`, so `Eq` here is ordering-equality, not SQL
/// equality (NULL equals NULL as a key; 1 and 1.0 share a slot).
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.sort_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sort_cmp(&other.0)
    }
}

#[derive(Debug)]
pub struct BTreeIndex {
    pub name: String,
    pub table: String,
    pub column: String,
    map: BTreeMap<IndexKey, BTreeSet<RowId>>,
}

impl BTreeIndex {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: &Value, row_id: RowId) {
        self.map
            .entry(IndexKey(value.deep_clone()))
            .or_default()
            .insert(row_id);
    }

    /// Remove one (value, row_id) entry; empty key slots are dropped.
    pub fn remove(&mut self, value: &Value, row_id: RowId) {
        let key = IndexKey(value.clone());
        if let Some(set) = self.map.get_mut(&key) {
            set.remove(&row_id);
            if set.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// Row ids carrying exactly this key value, ascending.
    pub fn query(&self, value: &Value) -> Vec<RowId> {
        self.map
            .get(&IndexKey(value.clone()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn entry_count(&self) -> usize {
        self.map.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_query() {
        let mut idx = BTreeIndex::new("idx_email", "users", "email");
        idx.insert(&Value::Text("a@x.com".into()), 1);
        idx.insert(&Value::Text("b@x.com".into()), 2);
        idx.insert(&Value::Text("a@x.com".into()), 3);

        assert_eq!(idx.query(&Value::Text("a@x.com".into())), vec![1, 3]);
        assert_eq!(idx.query(&Value::Text("b@x.com".into())), vec![2]);
        assert!(idx.query(&Value::Text("c@x.com".into())).is_empty());
    }

    #[test]
    fn test_remove_drops_empty_slots() {
        let mut idx = BTreeIndex::new("idx", "t", "c");
        idx.insert(&Value::Int(5), 1);
        idx.remove(&Value::Int(5), 1);
        assert!(idx.is_empty());
        // Removing an absent entry is a no-op.
        idx.remove(&Value::Int(5), 9);
    }

    #[test]
    fn test_int_and_float_keys_share_a_slot() {
        let mut idx = BTreeIndex::new("idx", "t", "c");
        idx.insert(&Value::Int(1), 1);
        idx.insert(&Value::Float(1.0), 2);
        assert_eq!(idx.query(&Value::Int(1)), vec![1, 2]);
    }

    #[test]
    fn test_null_is_a_key() {
        let mut idx = BTreeIndex::new("idx", "t", "c");
        idx.insert(&Value::Null, 4);
        assert_eq!(idx.query(&Value::Null), vec![4]);
    }

    #[test]
    fn test_entry_count() {
        let mut idx = BTreeIndex::new("idx", "t", "c");
        idx.insert(&Value::Int(1), 1);
        idx.insert(&Value::Int(1), 2);
        idx.insert(&Value::Int(2), 3);
        assert_eq!(idx.entry_count(), 3);
        idx.clear();
        assert_eq!(idx.entry_count(), 0);
    }
}
