//! Statement executor
//!
//! Volcano-style evaluation over the MVCC store: scan under snapshot
//! visibility (with a B-tree point-lookup fast path), filter, join,
//! aggregate, sort, limit, project. Write statements follow the
//! WAL-first discipline: the record is appended before the table and
//! index mutations, and a failure after the append unwinds the applied
//! work in reverse order so the statement leaves no visible effect.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::error::{DbError, Result, ValidationKind};
use crate::index::IndexManager;
use crate::mvcc::{vacuum_table, Table, VacuumStats};
use crate::sql::ast::*;
use crate::sql::evaluator::{is_true, Evaluator, NamedRow, SubqueryOutcome, SubqueryResults};
use crate::sql::join::{equi_join_keys, hash_join, nested_loop_join};
use crate::txn::{Snapshot, TransactionManager, WriteOp};
use crate::types::{Column, HashKey, Row, RowId, TxId, Value};
use crate::wal::{WalRecord, WalWriter};

/// Result of one executed statement.
#[derive(Debug)]
pub enum QueryResult {
    Select {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Modification {
        affected_rows: usize,
    },
    Definition {
        message: String,
    },
    Vacuum(Vec<VacuumStats>),
    Transaction {
        message: String,
    },
}

impl QueryResult {
    pub fn affected_rows(&self) -> usize {
        match self {
            QueryResult::Modification { affected_rows } => *affected_rows,
            _ => 0,
        }
    }

    pub fn select_rows(&self) -> Option<(&[String], &[Vec<Value>])> {
        match self {
            QueryResult::Select { columns, rows } => Some((columns.as_slice(), rows.as_slice())),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            QueryResult::Select { rows, .. } => rows.len(),
            QueryResult::Modification { affected_rows } => *affected_rows,
            _ => 0,
        }
    }
}

/// Short-lived execution context: references into the database held for
/// the duration of one statement.
pub struct ExecutorCtx<'a> {
    pub tables: &'a mut BTreeMap<String, Table>,
    pub txn: &'a TransactionManager,
    pub indexes: &'a IndexManager,
    pub wal: &'a mut WalWriter,
    pub snapshot: Snapshot,
    pub txid: TxId,
    pub mvcc_enabled: bool,
}

impl<'a> ExecutorCtx<'a> {
    pub fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        match stmt {
            Statement::Select(select) => {
                let (columns, rows) = self.run_select(select)?;
                Ok(QueryResult::Select { columns, rows })
            }
            Statement::Insert(insert) => self.execute_insert(insert),
            Statement::Update(update) => self.execute_update(update),
            Statement::Delete(delete) => self.execute_delete(delete),
            Statement::CreateTable(create) => self.execute_create_table(create),
            Statement::DropTable { table, if_exists } => {
                self.execute_drop_table(table, *if_exists)
            }
            Statement::AlterTable(alter) => self.execute_alter_table(alter),
            Statement::CreateIndex(create) => self.execute_create_index(create),
            Statement::DropIndex { index } => {
                self.indexes.drop_btree(index)?;
                Ok(QueryResult::Definition {
                    message: format!("index '{}' dropped", index),
                })
            }
            Statement::Vacuum { table } => self.execute_vacuum(table.as_deref()),
            Statement::ShowTables => Ok(QueryResult::Select {
                columns: vec!["table".to_string()],
                rows: self
                    .tables
                    .keys()
                    .map(|name| vec![Value::Text(name.clone())])
                    .collect(),
            }),
            Statement::Describe(name) => self.execute_describe(name),
            // BEGIN/COMMIT/ROLLBACK never reach the executor; the
            // database routes them through the transaction manager.
            Statement::Begin | Statement::Commit | Statement::Rollback => Err(DbError::Query(
                "transaction control statement reached the executor".into(),
            )),
        }
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::validation(ValidationKind::TableNotFound, name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::validation(ValidationKind::TableNotFound, name))
    }

    /// Append the transaction's begin record lazily, before its first
    /// write; read-only transactions never touch the log.
    fn ensure_begin_logged(&mut self) -> Result<()> {
        if !self.txn.is_wal_logged(self.txid) {
            self.wal.append(WalRecord::begin_tx(self.txid))?;
            self.txn.mark_wal_logged(self.txid);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    pub fn run_select(&self, stmt: &SelectStmt) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let mut subqueries = SubqueryResults::default();
        self.resolve_stmt_subqueries(stmt, &mut subqueries)?;
        let evaluator = Evaluator::new(&subqueries);

        let qualify = stmt.from.is_join();
        let single_table_hint = if qualify { None } else { stmt.where_clause.as_ref() };
        let (names, mut rows) =
            self.from_rows(&stmt.from, &evaluator, qualify, single_table_hint)?;

        if let Some(where_clause) = &stmt.where_clause {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if is_true(&evaluator.eval(where_clause, &row)?) {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        let has_aggregates = stmt.items.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
            SelectItem::Star => false,
        });
        let aggregated = !stmt.group_by.is_empty() || has_aggregates;
        if aggregated {
            rows = self.aggregate_rows(stmt, rows)?;
            if let Some(having) = &stmt.having {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if is_true(&evaluator.eval(having, &row)?) {
                        kept.push(row);
                    }
                }
                rows = kept;
            }
        }

        if !stmt.order_by.is_empty() {
            rows = self.sort_rows(stmt, rows, &evaluator)?;
        }

        let (headers, mut projected) = self.project(stmt, &names, &rows, &evaluator)?;

        if stmt.distinct {
            let mut seen: AHashMap<Vec<GroupKey>, ()> = AHashMap::new();
            let mut unique = Vec::with_capacity(projected.len());
            for row in projected {
                let key: Vec<GroupKey> = row.iter().map(group_key).collect();
                if seen.insert(key, ()).is_none() {
                    unique.push(row);
                }
            }
            projected = unique;
        }

        if let Some(limit) = stmt.limit {
            projected.truncate(limit);
        }

        Ok((headers, projected))
    }

    /// Evaluate a FROM tree to (column names, rows).
    fn from_rows(
        &self,
        from: &TableRef,
        evaluator: &Evaluator<'_>,
        qualify: bool,
        where_hint: Option<&Expr>,
    ) -> Result<(Vec<String>, Vec<NamedRow>)> {
        match from {
            TableRef::Table { name, alias } => {
                let binding = alias.as_deref().unwrap_or(name.as_str());
                self.scan_table(name, binding, qualify, where_hint)
            }
            TableRef::Join {
                left,
                right,
                join_type,
                on,
            } => {
                let (left_names, left_rows) = self.from_rows(left, evaluator, true, None)?;
                let (right_names, right_rows) = self.from_rows(right, evaluator, true, None)?;

                let joined = match equi_join_keys(on) {
                    Some((a, b)) => {
                        // Orient the keys: probe side is the left input.
                        let (probe_key, build_key) = if resolves_in(&left_names, a) {
                            (a, b)
                        } else {
                            (b, a)
                        };
                        hash_join(
                            &left_rows,
                            &right_rows,
                            probe_key,
                            build_key,
                            &left_names,
                            &right_names,
                            *join_type,
                        )?
                    }
                    None => nested_loop_join(
                        &left_rows,
                        &right_rows,
                        on,
                        evaluator,
                        &left_names,
                        &right_names,
                        *join_type,
                    )?,
                };

                let mut names = left_names;
                names.extend(right_names);
                Ok((names, joined))
            }
        }
    }

    /// Scan one table under the current snapshot, using a B-tree point
    /// lookup when the WHERE clause is a plain `col = literal` over an
    /// indexed column. Every index hit is re-checked through visibility
    /// and against the key value before inclusion.
    fn scan_table(
        &self,
        name: &str,
        binding: &str,
        qualify: bool,
        where_hint: Option<&Expr>,
    ) -> Result<(Vec<String>, Vec<NamedRow>)> {
        let table = self.table(name)?;
        let names: Vec<String> = table
            .columns()
            .iter()
            .map(|c| {
                if qualify {
                    format!("{}.{}", binding, c.name)
                } else {
                    c.name.clone()
                }
            })
            .collect();

        let clog = self.txn.clog();

        if let Some((column, key)) = where_hint.and_then(|w| point_lookup(w, binding)) {
            if let Some(index_name) = self.indexes.btree_for(name, &column) {
                let mut rows = Vec::new();
                for row_id in self.indexes.query(&index_name, &key)? {
                    if let Some(row) = table.get(row_id, &self.snapshot, clog) {
                        // The index may hold entries for other versions
                        // of this row; the visible value decides.
                        let matches = row
                            .get(&column)
                            .map(|v| v.compare(&key) == Some(std::cmp::Ordering::Equal))
                            .unwrap_or(false);
                        if matches {
                            rows.push(self.to_named(binding, qualify, &row));
                        }
                    }
                }
                return Ok((names, rows));
            }
        }

        let mut rows = Vec::new();
        for row_id in table.visible_row_ids(&self.snapshot, clog) {
            if let Some(row) = table.get(row_id, &self.snapshot, clog) {
                rows.push(self.to_named(binding, qualify, &row));
            }
        }
        Ok((names, rows))
    }

    fn to_named(&self, binding: &str, qualify: bool, row: &Row) -> NamedRow {
        if qualify {
            NamedRow::qualified(binding, row)
        } else {
            NamedRow::from_row(row)
        }
    }

    /// Group rows and compute every aggregate the statement mentions.
    /// Output rows hold the group columns under their display names plus
    /// one entry per aggregate (e.g. `COUNT(*)`), which is how HAVING,
    /// ORDER BY and projection find them.
    fn aggregate_rows(&self, stmt: &SelectStmt, rows: Vec<NamedRow>) -> Result<Vec<NamedRow>> {
        let mut specs: Vec<Expr> = Vec::new();
        for item in &stmt.items {
            if let SelectItem::Expr { expr, .. } = item {
                collect_aggregates(expr, &mut specs);
            }
        }
        if let Some(having) = &stmt.having {
            collect_aggregates(having, &mut specs);
        }
        for item in &stmt.order_by {
            collect_aggregates(&item.expr, &mut specs);
        }

        // Group by composite key; NULL is its own group, distinct from
        // any real value. Without GROUP BY everything lands in one
        // group, which exists even over empty input.
        let mut group_order: Vec<Vec<GroupKey>> = Vec::new();
        let mut groups: AHashMap<Vec<GroupKey>, Vec<NamedRow>> = AHashMap::new();
        if stmt.group_by.is_empty() {
            group_order.push(Vec::new());
            groups.insert(Vec::new(), rows);
        } else {
            for row in rows {
                let mut key = Vec::with_capacity(stmt.group_by.len());
                for col in &stmt.group_by {
                    key.push(group_key(&row.lookup(col)?));
                }
                if !groups.contains_key(&key) {
                    group_order.push(key.clone());
                }
                groups.entry(key).or_default().push(row);
            }
        }

        let mut out = Vec::with_capacity(group_order.len());
        for key in group_order {
            let members = groups.remove(&key).unwrap_or_default();
            let mut row = NamedRow::new();
            for col in &stmt.group_by {
                let value = match members.first() {
                    Some(first) => first.lookup(col)?,
                    None => Value::Null,
                };
                row.push(col.display(), value);
            }
            for spec in &specs {
                if let Expr::Aggregate { func, arg } = spec {
                    let value = compute_aggregate(*func, arg.as_ref(), &members)?;
                    let name = spec.display_name();
                    if row.get(&name).is_none() {
                        row.push(name, value);
                    }
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Stable sort by the ORDER BY items. An item naming a select alias
    /// sorts by that item's expression.
    fn sort_rows(
        &self,
        stmt: &SelectStmt,
        rows: Vec<NamedRow>,
        evaluator: &Evaluator<'_>,
    ) -> Result<Vec<NamedRow>> {
        let mut keyed: Vec<(Vec<Value>, NamedRow)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut keys = Vec::with_capacity(stmt.order_by.len());
            for item in &stmt.order_by {
                let expr = resolve_order_alias(&item.expr, stmt);
                keys.push(evaluator.eval(expr, &row)?);
            }
            keyed.push((keys, row));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for (i, item) in stmt.order_by.iter().enumerate() {
                let ord = a[i].sort_cmp(&b[i]);
                let ord = if item.asc { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn project(
        &self,
        stmt: &SelectStmt,
        names: &[String],
        rows: &[NamedRow],
        evaluator: &Evaluator<'_>,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let mut headers = Vec::new();
        for item in &stmt.items {
            match item {
                SelectItem::Star => headers.extend(names.iter().cloned()),
                SelectItem::Expr { expr, alias } => {
                    headers.push(alias.clone().unwrap_or_else(|| expr.display_name()));
                }
            }
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(headers.len());
            for item in &stmt.items {
                match item {
                    SelectItem::Star => {
                        for name in names {
                            values.push(row.get(name).cloned().unwrap_or(Value::Null));
                        }
                    }
                    SelectItem::Expr { expr, .. } => values.push(evaluator.eval(expr, row)?),
                }
            }
            out.push(values);
        }
        Ok((headers, out))
    }

    // ------------------------------------------------------------------
    // Subquery pre-pass (subqueries are uncorrelated)
    // ------------------------------------------------------------------

    fn resolve_stmt_subqueries(
        &self,
        stmt: &SelectStmt,
        results: &mut SubqueryResults,
    ) -> Result<()> {
        for item in &stmt.items {
            if let SelectItem::Expr { expr, .. } = item {
                self.resolve_subqueries(expr, results)?;
            }
        }
        if let Some(where_clause) = &stmt.where_clause {
            self.resolve_subqueries(where_clause, results)?;
        }
        if let Some(having) = &stmt.having {
            self.resolve_subqueries(having, results)?;
        }
        for item in &stmt.order_by {
            self.resolve_subqueries(&item.expr, results)?;
        }
        Ok(())
    }

    fn resolve_subqueries(&self, expr: &Expr, results: &mut SubqueryResults) -> Result<()> {
        match expr {
            Expr::Subquery(query) => {
                let (columns, rows) = self.run_select(query)?;
                if columns.len() != 1 {
                    return Err(DbError::Query(
                        "scalar subquery must return exactly one column".into(),
                    ));
                }
                if rows.len() > 1 {
                    return Err(DbError::SubqueryMultipleRows);
                }
                let value = rows
                    .into_iter()
                    .next()
                    .and_then(|mut r| {
                        if r.is_empty() {
                            None
                        } else {
                            Some(r.remove(0))
                        }
                    })
                    .unwrap_or(Value::Null);
                results.insert(query, SubqueryOutcome::Scalar(value));
                Ok(())
            }
            Expr::InSubquery { expr, query, .. } => {
                self.resolve_subqueries(expr, results)?;
                let (columns, rows) = self.run_select(query)?;
                if columns.len() != 1 {
                    return Err(DbError::Query(
                        "IN subquery must return exactly one column".into(),
                    ));
                }
                let values = rows
                    .into_iter()
                    .map(|mut r| r.remove(0))
                    .collect::<Vec<Value>>();
                results.insert(query, SubqueryOutcome::Column(values));
                Ok(())
            }
            Expr::Exists { query, .. } => {
                let (_, rows) = self.run_select(query)?;
                results.insert(query, SubqueryOutcome::Exists(!rows.is_empty()));
                Ok(())
            }
            Expr::Binary { left, right, .. } => {
                self.resolve_subqueries(left, results)?;
                self.resolve_subqueries(right, results)
            }
            Expr::Not(inner) | Expr::Neg(inner) => self.resolve_subqueries(inner, results),
            Expr::IsNull { expr, .. } => self.resolve_subqueries(expr, results),
            Expr::Like { expr, pattern, .. } => {
                self.resolve_subqueries(expr, results)?;
                self.resolve_subqueries(pattern, results)
            }
            Expr::InList { expr, list, .. } => {
                self.resolve_subqueries(expr, results)?;
                for item in list {
                    self.resolve_subqueries(item, results)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn execute_insert(&mut self, stmt: &InsertStmt) -> Result<QueryResult> {
        // Phase 1 (read-only): evaluate and coerce every value row.
        let mut subqueries = SubqueryResults::default();
        for row_exprs in &stmt.rows {
            for expr in row_exprs {
                self.resolve_subqueries(expr, &mut subqueries)?;
            }
        }
        let evaluator = Evaluator::new(&subqueries);
        let empty = NamedRow::new();

        let table = self.table(&stmt.table)?;
        let columns: Vec<Column> = table.columns().to_vec();
        let target_cols: Vec<String> = match &stmt.columns {
            Some(cols) => cols.clone(),
            None => columns.iter().map(|c| c.name.clone()).collect(),
        };

        let mut pending: Vec<Row> = Vec::with_capacity(stmt.rows.len());
        for row_exprs in &stmt.rows {
            if row_exprs.len() != target_cols.len() {
                return Err(DbError::Query(format!(
                    "INSERT expects {} values, got {}",
                    target_cols.len(),
                    row_exprs.len()
                )));
            }
            let mut row = Row::new();
            for column in &columns {
                let value = match target_cols.iter().position(|c| *c == column.name) {
                    Some(pos) => column.coerce(evaluator.eval(&row_exprs[pos], &empty)?)?,
                    None => Value::Null,
                };
                row.push(column.name.clone(), value);
            }
            pending.push(row);
        }

        // Phase 2: WAL, table, indexes per row, unwinding the whole
        // statement if any row fails.
        let mut inserted: Vec<(RowId, Row)> = Vec::with_capacity(pending.len());
        for row in pending {
            self.ensure_begin_logged()?;
            let table = self.table_mut(&stmt.table)?;
            let row_id = table.next_row_id();
            let record = WalRecord::insert_row(self.txid, &stmt.table, row_id, row.clone());
            self.wal.append(record)?;

            let txid = self.txid;
            let table = self.table_mut(&stmt.table)?;
            let assigned = table.insert(row.clone(), txid);
            debug_assert_eq!(assigned, row_id);

            if let Err(e) = self.indexes.on_insert(&stmt.table, row_id, &row, &columns) {
                self.unwind_inserts(&stmt.table, row_id, &inserted, &columns);
                return Err(e);
            }
            self.txn.record_write(
                self.txid,
                WriteOp::Insert {
                    table: stmt.table.clone(),
                    row_id,
                    row: row.clone(),
                },
            )?;
            inserted.push((row_id, row));
        }

        Ok(QueryResult::Modification {
            affected_rows: inserted.len(),
        })
    }

    /// Scoped rollback of a failed INSERT: the failing row's chain and
    /// every earlier row of the same statement disappear, indexes
    /// included, in reverse order.
    fn unwind_inserts(
        &mut self,
        table_name: &str,
        failed_row_id: RowId,
        inserted: &[(RowId, Row)],
        columns: &[Column],
    ) {
        if let Some(table) = self.tables.get_mut(table_name) {
            table.physical_delete(failed_row_id);
            for (row_id, row) in inserted.iter().rev() {
                self.indexes
                    .remove_row_entries(table_name, *row_id, row, columns);
                table.physical_delete(*row_id);
            }
        }
    }

    fn execute_update(&mut self, stmt: &UpdateStmt) -> Result<QueryResult> {
        // Phase 1: find target rows under the snapshot and compute the
        // new value of every assignment.
        let mut subqueries = SubqueryResults::default();
        for (_, expr) in &stmt.assignments {
            self.resolve_subqueries(expr, &mut subqueries)?;
        }
        if let Some(where_clause) = &stmt.where_clause {
            self.resolve_subqueries(where_clause, &mut subqueries)?;
        }
        let evaluator = Evaluator::new(&subqueries);

        let table = self.table(&stmt.table)?;
        let columns: Vec<Column> = table.columns().to_vec();
        let clog = self.txn.clog();

        let mut plans: Vec<(RowId, Row, Vec<(String, Value)>)> = Vec::new();
        for row_id in table.visible_row_ids(&self.snapshot, clog) {
            let row = match table.get(row_id, &self.snapshot, clog) {
                Some(row) => row,
                None => continue,
            };
            let named = NamedRow::from_row(&row);
            if let Some(where_clause) = &stmt.where_clause {
                if !is_true(&evaluator.eval(where_clause, &named)?) {
                    continue;
                }
            }
            let mut changes = Vec::with_capacity(stmt.assignments.len());
            for (col_name, expr) in &stmt.assignments {
                let column = columns
                    .iter()
                    .find(|c| c.name == *col_name)
                    .ok_or_else(|| {
                        DbError::validation(ValidationKind::ColumnNotFound, col_name.clone())
                    })?;
                let value = column.coerce(evaluator.eval(expr, &named)?)?;
                changes.push((col_name.clone(), value));
            }
            plans.push((row_id, row, changes));
        }

        // Phase 2: apply, column by column, with statement-scoped undo.
        let mut applied: Vec<(RowId, Row, Row, usize, bool)> = Vec::new();
        for (row_id, old_row, changes) in plans {
            self.ensure_begin_logged()?;

            let mut new_row = old_row.deep_clone();
            let mut applied_cols = 0usize;
            let mut row_err: Option<DbError> = None;

            for (col_name, value) in &changes {
                let record = WalRecord::update_col(
                    self.txid,
                    &stmt.table,
                    row_id,
                    col_name,
                    value.clone(),
                );
                if let Err(e) = self.wal.append(record) {
                    row_err = Some(e);
                    break;
                }
                let snapshot = self.snapshot.clone();
                let result = match self.tables.get_mut(&stmt.table) {
                    Some(table) => table.update(
                        row_id,
                        col_name,
                        value.clone(),
                        self.txid,
                        &snapshot,
                        self.txn.clog(),
                    ),
                    None => Err(DbError::validation(
                        ValidationKind::TableNotFound,
                        stmt.table.clone(),
                    )),
                };
                match result {
                    Ok(()) => {
                        new_row.set(col_name, value.clone());
                        applied_cols += 1;
                    }
                    Err(e) => {
                        row_err = Some(e);
                        break;
                    }
                }
            }

            if row_err.is_none() && applied_cols == changes.len() {
                match self
                    .indexes
                    .on_update(&stmt.table, row_id, &old_row, &new_row, &columns)
                {
                    Ok(()) => {
                        self.txn.record_write(
                            self.txid,
                            WriteOp::Update {
                                table: stmt.table.clone(),
                                row_id,
                                old_row: old_row.clone(),
                                new_row: new_row.clone(),
                            },
                        )?;
                        applied.push((row_id, old_row, new_row, applied_cols, true));
                        continue;
                    }
                    Err(e) => row_err = Some(e),
                }
            }

            // Unwind this partially-updated row, then the earlier rows.
            let err = match row_err {
                Some(e) => e,
                None => DbError::Query("update failed".into()),
            };
            applied.push((row_id, old_row, new_row, applied_cols, false));
            self.unwind_updates(&stmt.table, &applied, &columns);
            return Err(err);
        }

        Ok(QueryResult::Modification {
            affected_rows: applied.len(),
        })
    }

    fn unwind_updates(
        &mut self,
        table_name: &str,
        applied: &[(RowId, Row, Row, usize, bool)],
        columns: &[Column],
    ) {
        for (row_id, old_row, new_row, applied_cols, index_done) in applied.iter().rev() {
            if *index_done {
                self.indexes
                    .undo_update(table_name, *row_id, old_row, new_row, columns);
            }
            if let Some(table) = self.tables.get_mut(table_name) {
                for _ in 0..*applied_cols {
                    table.undo_update(*row_id, self.txid);
                }
            }
        }
    }

    fn execute_delete(&mut self, stmt: &DeleteStmt) -> Result<QueryResult> {
        let mut subqueries = SubqueryResults::default();
        if let Some(where_clause) = &stmt.where_clause {
            self.resolve_subqueries(where_clause, &mut subqueries)?;
        }
        let evaluator = Evaluator::new(&subqueries);

        let table = self.table(&stmt.table)?;
        let columns: Vec<Column> = table.columns().to_vec();
        let clog = self.txn.clog();

        let mut targets: Vec<(RowId, Row)> = Vec::new();
        for row_id in table.visible_row_ids(&self.snapshot, clog) {
            let row = match table.get(row_id, &self.snapshot, clog) {
                Some(row) => row,
                None => continue,
            };
            if let Some(where_clause) = &stmt.where_clause {
                if !is_true(&evaluator.eval(where_clause, &NamedRow::from_row(&row))?) {
                    continue;
                }
            }
            targets.push((row_id, row));
        }

        let mut deleted: Vec<(RowId, Row)> = Vec::with_capacity(targets.len());
        for (row_id, row) in targets {
            self.ensure_begin_logged()?;
            self.wal
                .append(WalRecord::delete_row(self.txid, &stmt.table, row_id))?;

            let snapshot = self.snapshot.clone();
            let result = {
                let clog = self.txn.clog();
                let table = match self.tables.get_mut(&stmt.table) {
                    Some(t) => t,
                    None => {
                        return Err(DbError::validation(
                            ValidationKind::TableNotFound,
                            stmt.table.clone(),
                        ))
                    }
                };
                table.delete(row_id, self.txid, &snapshot, clog)
            };
            if let Err(e) = result {
                self.unwind_deletes(&stmt.table, &deleted, &columns);
                return Err(e);
            }

            self.indexes.on_delete(&stmt.table, row_id, &row, &columns);
            self.txn.record_write(
                self.txid,
                WriteOp::Delete {
                    table: stmt.table.clone(),
                    row_id,
                    row: row.clone(),
                },
            )?;
            deleted.push((row_id, row));
        }

        Ok(QueryResult::Modification {
            affected_rows: deleted.len(),
        })
    }

    fn unwind_deletes(&mut self, table_name: &str, deleted: &[(RowId, Row)], columns: &[Column]) {
        for (row_id, row) in deleted.iter().rev() {
            if let Some(table) = self.tables.get_mut(table_name) {
                table.undo_delete(*row_id, self.txid);
            }
            self.indexes.undo_delete(table_name, *row_id, row, columns);
        }
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    fn execute_create_table(&mut self, stmt: &CreateTableStmt) -> Result<QueryResult> {
        if self.tables.contains_key(&stmt.table) {
            return Err(DbError::Query(format!(
                "table '{}' already exists",
                stmt.table
            )));
        }
        let columns: Vec<Column> = stmt
            .columns
            .iter()
            .map(|def| Column {
                name: def.name.clone(),
                data_type: def.data_type,
                dimension: def.dimension,
            })
            .collect();
        for column in &columns {
            if let Some(dim) = column.dimension {
                self.indexes.get_or_create_hnsw(dim);
            }
        }
        self.tables.insert(
            stmt.table.clone(),
            Table::new(stmt.table.clone(), columns, self.mvcc_enabled),
        );
        Ok(QueryResult::Definition {
            message: format!("table '{}' created", stmt.table),
        })
    }

    fn execute_drop_table(&mut self, name: &str, if_exists: bool) -> Result<QueryResult> {
        if !self.tables.contains_key(name) {
            if if_exists {
                return Ok(QueryResult::Definition {
                    message: format!("table '{}' does not exist, skipped", name),
                });
            }
            return Err(DbError::validation(ValidationKind::TableNotFound, name));
        }

        // Gather rows for vector cleanup before the table goes away.
        let (rows, columns) = {
            let table = self.table(name)?;
            let clog = self.txn.clog();
            let rows: Vec<(RowId, Row)> = table
                .visible_row_ids(&self.snapshot, clog)
                .into_iter()
                .filter_map(|id| table.get(id, &self.snapshot, clog).map(|r| (id, r)))
                .collect();
            (rows, table.columns().to_vec())
        };
        self.indexes.drop_table(name, &rows, &columns);
        self.tables.remove(name);
        Ok(QueryResult::Definition {
            message: format!("table '{}' dropped", name),
        })
    }

    fn execute_alter_table(&mut self, stmt: &AlterTableStmt) -> Result<QueryResult> {
        match &stmt.op {
            AlterTableOp::AddColumn(def) => {
                let column = Column {
                    name: def.name.clone(),
                    data_type: def.data_type,
                    dimension: def.dimension,
                };
                let table = self.table_mut(&stmt.table)?;
                if table.column(&def.name).is_some() {
                    return Err(DbError::validation(
                        ValidationKind::DuplicateColumn,
                        def.name.clone(),
                    ));
                }
                table.add_column(column);
                Ok(QueryResult::Definition {
                    message: format!("column '{}' added", def.name),
                })
            }
            AlterTableOp::DropColumn(name) => {
                {
                    let table = self.table_mut(&stmt.table)?;
                    table.drop_column(name)?;
                }
                self.indexes.drop_btrees_for_column(&stmt.table, name);
                Ok(QueryResult::Definition {
                    message: format!("column '{}' dropped", name),
                })
            }
            AlterTableOp::RenameColumn { old, new } => {
                {
                    let table = self.table_mut(&stmt.table)?;
                    if table.column(new).is_some() {
                        return Err(DbError::validation(
                            ValidationKind::DuplicateColumn,
                            new.clone(),
                        ));
                    }
                    table.rename_column(old, new)?;
                }
                self.indexes.rename_column(&stmt.table, old, new);
                Ok(QueryResult::Definition {
                    message: format!("column '{}' renamed to '{}'", old, new),
                })
            }
        }
    }

    fn execute_create_index(&mut self, stmt: &CreateIndexStmt) -> Result<QueryResult> {
        let table = self.table(&stmt.table)?;
        let column = table.column(&stmt.column).ok_or_else(|| {
            DbError::validation(ValidationKind::ColumnNotFound, stmt.column.clone())
        })?;
        if column.data_type == crate::types::DataType::Embedding {
            return Err(DbError::Query(
                "embedding columns are indexed by the vector index, not a btree".into(),
            ));
        }

        let clog = self.txn.clog();
        let entries: Vec<(RowId, Value)> = table
            .visible_row_ids(&self.snapshot, clog)
            .into_iter()
            .filter_map(|id| {
                table
                    .get(id, &self.snapshot, clog)
                    .and_then(|row| row.get(&stmt.column).cloned())
                    .map(|v| (id, v))
            })
            .collect();

        self.indexes
            .create_btree(&stmt.index, &stmt.table, &stmt.column, entries)?;
        Ok(QueryResult::Definition {
            message: format!("index '{}' created", stmt.index),
        })
    }

    fn execute_vacuum(&mut self, target: Option<&str>) -> Result<QueryResult> {
        let horizon = self
            .txn
            .oldest_live_snapshot_txid()
            .unwrap_or(u64::MAX);
        let clog = self.txn.clog();

        let mut stats = Vec::new();
        match target {
            Some(name) => {
                let table = self
                    .tables
                    .get_mut(name)
                    .ok_or_else(|| DbError::validation(ValidationKind::TableNotFound, name))?;
                stats.push(vacuum_table(table, clog, horizon));
            }
            None => {
                for table in self.tables.values_mut() {
                    stats.push(vacuum_table(table, clog, horizon));
                }
            }
        }

        // Shed B-tree entries whose versions were just reclaimed.
        let snapshot = self.snapshot.clone();
        let tables = &*self.tables;
        let clog = self.txn.clog();
        self.indexes.rebuild_btrees(&move |table_name: &str| {
            tables
                .get(table_name)
                .map(|table| {
                    table
                        .visible_row_ids(&snapshot, clog)
                        .into_iter()
                        .filter_map(|id| table.get(id, &snapshot, clog).map(|r| (id, r)))
                        .collect()
                })
                .unwrap_or_default()
        });

        Ok(QueryResult::Vacuum(stats))
    }

    fn execute_describe(&self, name: &str) -> Result<QueryResult> {
        let table = self.table(name)?;
        let rows = table
            .columns()
            .iter()
            .map(|c| {
                vec![
                    Value::Text(c.name.clone()),
                    Value::Text(c.data_type.name().to_string()),
                    c.dimension.map(|d| Value::Int(d as i64)).unwrap_or(Value::Null),
                ]
            })
            .collect();
        Ok(QueryResult::Select {
            columns: vec![
                "column".to_string(),
                "type".to_string(),
                "dimension".to_string(),
            ],
            rows,
        })
    }
}

/// Composite grouping/distinct key. NULL is its own group (distinct from
/// the empty string and every other value); embeddings key by bit
/// pattern so DISTINCT over star projections stays well-defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Null,
    Key(HashKey),
    Embedding(Vec<u32>),
}

fn group_key(value: &Value) -> GroupKey {
    match value {
        Value::Embedding(v) => GroupKey::Embedding(v.iter().map(|x| x.to_bits()).collect()),
        other => match other.hash_key() {
            Some(key) => GroupKey::Key(key),
            None => GroupKey::Null,
        },
    }
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out
                .iter()
                .any(|e| e.display_name() == expr.display_name())
            {
                out.push(expr.clone());
            }
        }
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Not(inner) | Expr::Neg(inner) => collect_aggregates(inner, out),
        Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => collect_aggregates(expr, out),
        Expr::InList { expr, list, .. } => {
            collect_aggregates(expr, out);
            for item in list {
                collect_aggregates(item, out);
            }
        }
        Expr::InSubquery { expr, .. } => collect_aggregates(expr, out),
        _ => {}
    }
}

fn compute_aggregate(
    func: AggFunc,
    arg: Option<&ColumnRef>,
    rows: &[NamedRow],
) -> Result<Value> {
    if func == AggFunc::Count && arg.is_none() {
        return Ok(Value::Int(rows.len() as i64));
    }
    let col = match arg {
        Some(col) => col,
        None => return Err(DbError::Query(format!("{} requires a column", func.name()))),
    };

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let v = row.lookup(col)?;
        if !v.is_null() {
            values.push(v);
        }
    }

    match func {
        AggFunc::Count => Ok(Value::Int(values.len() as i64)),
        AggFunc::Sum => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                let mut sum = 0i64;
                for v in &values {
                    if let Value::Int(i) = v {
                        sum = sum.wrapping_add(*i);
                    }
                }
                Ok(Value::Int(sum))
            } else {
                let mut sum = 0f64;
                for v in &values {
                    sum += v.as_f64().ok_or_else(|| {
                        DbError::TypeError(format!("SUM over non-numeric {}", v.type_name()))
                    })?;
                }
                Ok(Value::Float(sum))
            }
        }
        AggFunc::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0f64;
            for v in &values {
                sum += v.as_f64().ok_or_else(|| {
                    DbError::TypeError(format!("AVG over non-numeric {}", v.type_name()))
                })?;
            }
            Ok(Value::Float(sum / values.len() as f64))
        }
        AggFunc::Min => Ok(values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null)),
        AggFunc::Max => Ok(values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null)),
    }
}

/// An ORDER BY item naming a select alias sorts by the aliased
/// expression.
fn resolve_order_alias<'e>(expr: &'e Expr, stmt: &'e SelectStmt) -> &'e Expr {
    if let Expr::Column(col) = expr {
        if col.table.is_none() {
            for item in &stmt.items {
                if let SelectItem::Expr {
                    expr: item_expr,
                    alias: Some(alias),
                } = item
                {
                    if *alias == col.column {
                        return item_expr;
                    }
                }
            }
        }
    }
    expr
}

/// `WHERE col = literal` (either side) over this binding, for the index
/// fast path.
fn point_lookup(where_clause: &Expr, binding: &str) -> Option<(String, Value)> {
    if let Expr::Binary {
        left,
        op: BinaryOp::Eq,
        right,
    } = where_clause
    {
        let (col, value) = match (left.as_ref(), right.as_ref()) {
            (Expr::Column(col), Expr::Literal(v)) => (col, v),
            (Expr::Literal(v), Expr::Column(col)) => (col, v),
            _ => return None,
        };
        if value.is_null() || matches!(value, Value::Embedding(_)) {
            return None;
        }
        match &col.table {
            Some(t) if t != binding => None,
            _ => Some((col.column.clone(), value.clone())),
        }
    } else {
        None
    }
}

/// Whether a column reference resolves against a side's column names.
fn resolves_in(names: &[String], col: &ColumnRef) -> bool {
    match &col.table {
        Some(t) => {
            let qualified = format!("{}.{}", t, col.column);
            names.iter().any(|n| *n == qualified)
        }
        None => {
            let suffix = format!(".{}", col.column);
            names
                .iter()
                .any(|n| *n == col.column || n.ends_with(&suffix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::database::Database;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path(), DbConfig::default()).unwrap()
    }

    fn select_rows(db: &mut Database, sql: &str) -> Vec<Vec<Value>> {
        match db.execute(sql).unwrap() {
            QueryResult::Select { rows, .. } => rows,
            other => panic!("expected select result, got {:?}", other),
        }
    }

    fn seed_sales(db: &mut Database) {
        db.execute("CREATE TABLE sales (region TEXT, amount INT, rep TEXT)")
            .unwrap();
        db.execute(
            "INSERT INTO sales VALUES \
             ('north', 100, 'ann'), ('north', 200, 'bob'), \
             ('south', 50, 'cid'), ('south', 70, 'dee'), \
             ('west', 10, 'eve'), (NULL, 5, 'fox')",
        )
        .unwrap();
    }

    #[test]
    fn test_aggregate_functions() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(
            &mut db,
            "SELECT COUNT(*), SUM(amount), AVG(amount), MIN(amount), MAX(amount) FROM sales",
        );
        assert_eq!(
            rows,
            vec![vec![
                Value::Int(6),
                Value::Int(435),
                Value::Float(72.5),
                Value::Int(5),
                Value::Int(200),
            ]]
        );
    }

    #[test]
    fn test_count_column_excludes_nulls() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(&mut db, "SELECT COUNT(region) FROM sales");
        assert_eq!(rows, vec![vec![Value::Int(5)]]);
    }

    #[test]
    fn test_null_is_its_own_group() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);
        // An empty string is a different group from NULL.
        db.execute("INSERT INTO sales VALUES ('', 1, 'gus')").unwrap();

        let rows = select_rows(
            &mut db,
            "SELECT region, COUNT(*) FROM sales GROUP BY region",
        );
        assert_eq!(rows.len(), 5);
        assert!(rows.contains(&vec![Value::Null, Value::Int(1)]));
        assert!(rows.contains(&vec![Value::Text(String::new()), Value::Int(1)]));
    }

    #[test]
    fn test_having_filters_groups() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(
            &mut db,
            "SELECT region, SUM(amount) FROM sales GROUP BY region \
             HAVING SUM(amount) > 100 ORDER BY region",
        );
        assert_eq!(
            rows,
            vec![
                vec![Value::Text("north".into()), Value::Int(300)],
                vec![Value::Text("south".into()), Value::Int(120)],
            ]
        );
    }

    #[test]
    fn test_order_by_aggregate() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(
            &mut db,
            "SELECT region, SUM(amount) FROM sales GROUP BY region \
             ORDER BY SUM(amount) DESC LIMIT 2",
        );
        assert_eq!(rows[0][1], Value::Int(300));
        assert_eq!(rows[1][1], Value::Int(120));
    }

    #[test]
    fn test_order_by_alias() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(
            &mut db,
            "SELECT region, SUM(amount) AS total FROM sales GROUP BY region \
             ORDER BY total DESC LIMIT 1",
        );
        assert_eq!(rows, vec![vec![Value::Text("north".into()), Value::Int(300)]]);
    }

    #[test]
    fn test_like_and_not_like() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        seed_sales(&mut db);

        let rows = select_rows(
            &mut db,
            "SELECT rep FROM sales WHERE rep LIKE '%e%' ORDER BY rep",
        );
        assert_eq!(
            rows,
            vec![vec![Value::Text("dee".into())], vec![Value::Text("eve".into())]]
        );

        let rows = select_rows(&mut db, "SELECT rep FROM sales WHERE rep NOT LIKE '_o_'");
        // bob and fox match '_o_'; NULL region does not matter here.
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_index_point_lookup_respects_visibility() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE items (id INT, tag TEXT)").unwrap();
        db.execute("CREATE INDEX idx_tag ON items (tag)").unwrap();
        db.execute("INSERT INTO items VALUES (1, 'hot'), (2, 'cold')").unwrap();
        db.execute("UPDATE items SET tag = 'warm' WHERE id = 1").unwrap();

        // The old key still has a (stale) index entry; the fast path
        // must re-verify the visible value and return nothing.
        let rows = select_rows(&mut db, "SELECT id FROM items WHERE tag = 'hot'");
        assert!(rows.is_empty());
        let rows = select_rows(&mut db, "SELECT id FROM items WHERE tag = 'warm'");
        assert_eq!(rows, vec![vec![Value::Int(1)]]);

        // Deleted rows disappear from index-backed lookups too.
        db.execute("DELETE FROM items WHERE id = 2").unwrap();
        let rows = select_rows(&mut db, "SELECT id FROM items WHERE tag = 'cold'");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_multi_assignment_update_single_statement() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE p (id INT, a INT, b INT)").unwrap();
        db.execute("INSERT INTO p VALUES (1, 10, 20)").unwrap();
        db.execute("UPDATE p SET a = 11, b = 21 WHERE id = 1").unwrap();

        let rows = select_rows(&mut db, "SELECT a, b FROM p");
        assert_eq!(rows, vec![vec![Value::Int(11), Value::Int(21)]]);
        // Column-granular versioning: one version per assignment.
        assert_eq!(db.table("p").unwrap().chain_len(1), 3);
    }

    #[test]
    fn test_update_expression_uses_old_row() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE acct (id INT, balance INT)").unwrap();
        db.execute("INSERT INTO acct VALUES (1, 100)").unwrap();
        db.execute("UPDATE acct SET balance = balance + 50 WHERE id = 1")
            .unwrap();

        let rows = select_rows(&mut db, "SELECT balance FROM acct");
        assert_eq!(rows, vec![vec![Value::Int(150)]]);
    }

    #[test]
    fn test_delete_with_in_subquery() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE a (id INT)").unwrap();
        db.execute("CREATE TABLE blocked (id INT)").unwrap();
        db.execute("INSERT INTO a VALUES (1), (2), (3)").unwrap();
        db.execute("INSERT INTO blocked VALUES (2)").unwrap();

        let result = db
            .execute("DELETE FROM a WHERE id IN (SELECT id FROM blocked)")
            .unwrap();
        assert_eq!(result.affected_rows(), 1);
        assert_eq!(select_rows(&mut db, "SELECT id FROM a ORDER BY id").len(), 2);
    }

    #[test]
    fn test_show_tables_and_describe() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE zed (id INT, vec EMBEDDING(4))").unwrap();

        let rows = select_rows(&mut db, "SHOW TABLES");
        assert_eq!(rows, vec![vec![Value::Text("zed".into())]]);

        let rows = select_rows(&mut db, "DESCRIBE zed");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Value::Text("vec".into()));
        assert_eq!(rows[1][1], Value::Text("EMBEDDING".into()));
        assert_eq!(rows[1][2], Value::Int(4));
    }

    #[test]
    fn test_insert_with_column_list_pads_nulls() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE t (id INT, name TEXT, score FLOAT)").unwrap();
        db.execute("INSERT INTO t (name, id) VALUES ('x', 7)").unwrap();

        let rows = select_rows(&mut db, "SELECT id, name, score FROM t");
        assert_eq!(
            rows,
            vec![vec![Value::Int(7), Value::Text("x".into()), Value::Null]]
        );
    }
}
