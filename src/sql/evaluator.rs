//! Expression evaluation
//!
//! Evaluates expressions against named rows under SQL trinary logic:
//! comparisons with NULL yield NULL, AND/OR follow Kleene semantics, and
//! a WHERE predicate keeps a row only when it evaluates to true. LIKE
//! uses `%`/`_` wildcards and is byte-case-sensitive. Subqueries are
//! uncorrelated and arrive pre-evaluated.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{DbError, Result};
use crate::sql::ast::{BinaryOp, ColumnRef, Expr, SelectStmt};
use crate::types::{Row, Value};

/// A row under evaluation: ordered (name, value) pairs where names may
/// be binding-qualified (`alias.column`) in join contexts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamedRow {
    entries: Vec<(String, Value)>,
}

impl NamedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            entries: row.iter().cloned().collect(),
        }
    }

    /// Qualify every column with a binding name, as join inputs are.
    pub fn qualified(binding: &str, row: &Row) -> Self {
        Self {
            entries: row
                .iter()
                .map(|(n, v)| (format!("{}.{}", binding, n), v.clone()))
                .collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn merge(mut self, other: NamedRow) -> NamedRow {
        self.entries.extend(other.entries);
        self
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Resolve a column reference: exact match first, then a unique
    /// `*.column` suffix match for unqualified names in join rows.
    pub fn lookup(&self, col: &ColumnRef) -> Result<Value> {
        if let Some(table) = &col.table {
            let qualified = format!("{}.{}", table, col.column);
            return self
                .get(&qualified)
                .cloned()
                .ok_or_else(|| DbError::Query(format!("column '{}' not found", qualified)));
        }
        if let Some(v) = self.get(&col.column) {
            return Ok(v.clone());
        }
        let suffix = format!(".{}", col.column);
        let mut hits = self
            .entries
            .iter()
            .filter(|(n, _)| n.ends_with(&suffix));
        match (hits.next(), hits.next()) {
            (Some((_, v)), None) => Ok(v.clone()),
            (Some(_), Some(_)) => Err(DbError::Query(format!(
                "ambiguous column '{}'",
                col.column
            ))),
            _ => Err(DbError::Query(format!("column '{}' not found", col.column))),
        }
    }
}

/// Pre-evaluated result of one uncorrelated subquery.
#[derive(Debug, Clone)]
pub enum SubqueryOutcome {
    Scalar(Value),
    Column(Vec<Value>),
    Exists(bool),
}

/// Subquery results keyed by AST node address; the statement is not
/// moved while a query runs, so the address is stable.
#[derive(Debug, Default)]
pub struct SubqueryResults {
    map: HashMap<usize, SubqueryOutcome>,
}

impl SubqueryResults {
    pub fn key(stmt: &SelectStmt) -> usize {
        stmt as *const SelectStmt as usize
    }

    pub fn insert(&mut self, stmt: &SelectStmt, outcome: SubqueryOutcome) {
        self.map.insert(Self::key(stmt), outcome);
    }

    fn get(&self, stmt: &SelectStmt) -> Result<&SubqueryOutcome> {
        self.map
            .get(&Self::key(stmt))
            .ok_or_else(|| DbError::Query("subquery was not pre-evaluated".into()))
    }
}

pub struct Evaluator<'a> {
    subqueries: &'a SubqueryResults,
}

/// True only for a definite SQL true.
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

impl<'a> Evaluator<'a> {
    pub fn new(subqueries: &'a SubqueryResults) -> Self {
        Self { subqueries }
    }

    pub fn eval(&self, expr: &Expr, row: &NamedRow) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(col) => row.lookup(col),
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, row),
            Expr::Not(inner) => Ok(trinary_not(self.eval(inner, row)?)),
            Expr::Neg(inner) => match self.eval(inner, row)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(DbError::TypeError(format!(
                    "cannot negate {}",
                    other.type_name()
                ))),
            },
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, row)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let target = self.eval(expr, row)?;
                let pattern = self.eval(pattern, row)?;
                match (target, pattern) {
                    (Value::Text(t), Value::Text(p)) => {
                        let matched = like_match(t.as_bytes(), p.as_bytes());
                        Ok(Value::Bool(matched != *negated))
                    }
                    _ => Ok(Value::Null),
                }
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let target = self.eval(expr, row)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    items.push(self.eval(item, row)?);
                }
                Ok(eval_in(&target, &items, *negated))
            }
            Expr::InSubquery {
                expr,
                query,
                negated,
            } => {
                let target = self.eval(expr, row)?;
                match self.subqueries.get(query)? {
                    SubqueryOutcome::Column(items) => Ok(eval_in(&target, items, *negated)),
                    _ => Err(DbError::Query("IN subquery resolved to a non-column".into())),
                }
            }
            Expr::Exists { query, negated } => match self.subqueries.get(query)? {
                SubqueryOutcome::Exists(found) => Ok(Value::Bool(found != negated)),
                _ => Err(DbError::Query("EXISTS subquery resolved badly".into())),
            },
            Expr::Subquery(query) => match self.subqueries.get(query)? {
                SubqueryOutcome::Scalar(v) => Ok(v.clone()),
                _ => Err(DbError::Query("scalar subquery resolved badly".into())),
            },
            // Aggregates were materialized by the aggregation pass and
            // live in the row under their display name.
            Expr::Aggregate { .. } => {
                let name = expr.display_name();
                row.get(&name).cloned().ok_or_else(|| {
                    DbError::Query(format!("aggregate '{}' not available here", name))
                })
            }
        }
    }

    fn eval_binary(&self, left: &Expr, op: BinaryOp, right: &Expr, row: &NamedRow) -> Result<Value> {
        match op {
            BinaryOp::And => {
                let l = self.eval(left, row)?;
                if matches!(l, Value::Bool(false)) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(right, row)?;
                Ok(kleene_and(&l, &r))
            }
            BinaryOp::Or => {
                let l = self.eval(left, row)?;
                if matches!(l, Value::Bool(true)) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(right, row)?;
                Ok(kleene_or(&l, &r))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                Ok(compare(&l, op, &r))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                arithmetic(&l, op, &r)
            }
        }
    }
}

fn trinary_not(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(!b),
        _ => Value::Null,
    }
}

fn kleene_and(l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
        (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

fn kleene_or(l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
        (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

fn compare(l: &Value, op: BinaryOp, r: &Value) -> Value {
    // Embedding equality is unsupported: `=` is always false, `<>`
    // always true, orderings are NULL.
    if let (Value::Embedding(_), Value::Embedding(_)) = (l, r) {
        return match op {
            BinaryOp::Eq => Value::Bool(false),
            BinaryOp::Ne => Value::Bool(true),
            _ => Value::Null,
        };
    }
    match l.compare(r) {
        None => Value::Null,
        Some(ord) => {
            let result = match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::Ne => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                _ => return Value::Null,
            };
            Value::Bool(result)
        }
    }
}

fn arithmetic(l: &Value, op: BinaryOp, r: &Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(match op {
            BinaryOp::Add => Value::Int(a.wrapping_add(*b)),
            BinaryOp::Sub => Value::Int(a.wrapping_sub(*b)),
            BinaryOp::Mul => Value::Int(a.wrapping_mul(*b)),
            BinaryOp::Div => {
                if *b == 0 {
                    Value::Null
                } else {
                    Value::Float(*a as f64 / *b as f64)
                }
            }
            _ => Value::Null,
        }),
        _ => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(DbError::TypeError(format!(
                        "cannot apply {} to {} and {}",
                        op.symbol(),
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            Ok(match op {
                BinaryOp::Add => Value::Float(a + b),
                BinaryOp::Sub => Value::Float(a - b),
                BinaryOp::Mul => Value::Float(a * b),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Float(a / b)
                    }
                }
                _ => Value::Null,
            })
        }
    }
}

/// SQL IN over a materialized item list, with trinary NULL handling: a
/// match wins, otherwise any NULL among the inputs poisons the result.
fn eval_in(target: &Value, items: &[Value], negated: bool) -> Value {
    if target.is_null() {
        return Value::Null;
    }
    let mut saw_null = false;
    for item in items {
        if item.is_null() {
            saw_null = true;
            continue;
        }
        if target.compare(item) == Some(Ordering::Equal) {
            return Value::Bool(!negated);
        }
    }
    if saw_null {
        Value::Null
    } else {
        Value::Bool(negated)
    }
}

/// Byte-wise LIKE with `%` (any run) and `_` (any single byte).
fn like_match(text: &[u8], pattern: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'%') => {
            (0..=text.len()).any(|i| like_match(&text[i..], &pattern[1..]))
        }
        Some(b'_') => !text.is_empty() && like_match(&text[1..], &pattern[1..]),
        Some(&c) => text.first() == Some(&c) && like_match(&text[1..], &pattern[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql;
    use crate::sql::ast::Statement;

    fn where_expr(sql_text: &str) -> Expr {
        match sql::parse(sql_text).unwrap() {
            Statement::Select(select) => select.where_clause.unwrap(),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    fn eval_with(row: &NamedRow, clause: &str) -> Value {
        let expr = where_expr(&format!("SELECT * FROM t WHERE {}", clause));
        let subs = SubqueryResults::default();
        Evaluator::new(&subs).eval(&expr, row).unwrap()
    }

    fn sample_row() -> NamedRow {
        let mut row = NamedRow::new();
        row.push("id", Value::Int(3));
        row.push("name", Value::Text("Widget".into()));
        row.push("price", Value::Float(10.0));
        row.push("note", Value::Null);
        row
    }

    #[test]
    fn test_comparisons() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "id = 3"), Value::Bool(true));
        assert_eq!(eval_with(&row, "id <> 3"), Value::Bool(false));
        assert_eq!(eval_with(&row, "price >= 10"), Value::Bool(true));
        assert_eq!(eval_with(&row, "price < 9.5"), Value::Bool(false));
    }

    #[test]
    fn test_null_comparisons_are_null() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "note = 1"), Value::Null);
        assert_eq!(eval_with(&row, "note <> 1"), Value::Null);
        assert_eq!(eval_with(&row, "note IS NULL"), Value::Bool(true));
        assert_eq!(eval_with(&row, "note IS NOT NULL"), Value::Bool(false));
        assert_eq!(eval_with(&row, "id IS NULL"), Value::Bool(false));
    }

    #[test]
    fn test_kleene_logic() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "note = 1 AND id = 3"), Value::Null);
        assert_eq!(eval_with(&row, "note = 1 AND id = 4"), Value::Bool(false));
        assert_eq!(eval_with(&row, "note = 1 OR id = 3"), Value::Bool(true));
        assert_eq!(eval_with(&row, "note = 1 OR id = 4"), Value::Null);
        assert_eq!(eval_with(&row, "NOT note = 1"), Value::Null);
        assert_eq!(eval_with(&row, "NOT id = 4"), Value::Bool(true));
    }

    #[test]
    fn test_like_patterns() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "name LIKE 'Wid%'"), Value::Bool(true));
        assert_eq!(eval_with(&row, "name LIKE '%get'"), Value::Bool(true));
        assert_eq!(eval_with(&row, "name LIKE 'W_dget'"), Value::Bool(true));
        assert_eq!(eval_with(&row, "name LIKE 'wid%'"), Value::Bool(false));
        assert_eq!(eval_with(&row, "name NOT LIKE 'Gad%'"), Value::Bool(true));
        assert_eq!(eval_with(&row, "note LIKE 'x%'"), Value::Null);
    }

    #[test]
    fn test_in_list_with_nulls() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "id IN (1, 2, 3)"), Value::Bool(true));
        assert_eq!(eval_with(&row, "id IN (1, 2)"), Value::Bool(false));
        // No match plus a NULL in the list is unknown.
        assert_eq!(eval_with(&row, "id IN (1, NULL)"), Value::Null);
        assert_eq!(eval_with(&row, "note IN (1, 2)"), Value::Null);
        assert_eq!(eval_with(&row, "id NOT IN (1, 2)"), Value::Bool(true));
        assert_eq!(eval_with(&row, "id NOT IN (1, NULL)"), Value::Null);
        assert_eq!(eval_with(&row, "id NOT IN (3, NULL)"), Value::Bool(false));
    }

    #[test]
    fn test_arithmetic() {
        let row = sample_row();
        assert_eq!(eval_with(&row, "id + 1 = 4"), Value::Bool(true));
        assert_eq!(eval_with(&row, "price * 2 = 20.0"), Value::Bool(true));
        assert_eq!(eval_with(&row, "id / 0 IS NULL"), Value::Bool(true));
        assert_eq!(eval_with(&row, "note + 1 IS NULL"), Value::Bool(true));
    }

    #[test]
    fn test_embedding_equality_unsupported() {
        let mut row = NamedRow::new();
        row.push("vec", Value::Embedding(vec![1.0]));
        assert_eq!(eval_with(&row, "vec = [1.0]"), Value::Bool(false));
        assert_eq!(eval_with(&row, "vec <> [1.0]"), Value::Bool(true));
    }

    #[test]
    fn test_qualified_lookup() {
        let mut users_row = Row::new();
        users_row.push("id", Value::Int(1));
        let mut orders_row = Row::new();
        orders_row.push("id", Value::Int(9));

        let row = NamedRow::qualified("u", &users_row).merge(NamedRow::qualified("o", &orders_row));
        assert_eq!(
            row.lookup(&ColumnRef {
                table: Some("u".into()),
                column: "id".into()
            })
            .unwrap(),
            Value::Int(1)
        );
        // Unqualified `id` is ambiguous across u and o.
        assert!(row.lookup(&ColumnRef::bare("id")).is_err());
    }

    #[test]
    fn test_exists_and_scalar_from_cache() {
        let stmt = sql::parse("SELECT * FROM t WHERE EXISTS (SELECT id FROM u)").unwrap();
        let expr = match stmt {
            Statement::Select(s) => s.where_clause.unwrap(),
            _ => unreachable!(),
        };
        let query = match &expr {
            Expr::Exists { query, .. } => query,
            _ => unreachable!(),
        };

        let mut subs = SubqueryResults::default();
        subs.insert(query, SubqueryOutcome::Exists(true));
        let row = NamedRow::new();
        assert_eq!(
            Evaluator::new(&subs).eval(&expr, &row).unwrap(),
            Value::Bool(true)
        );
    }
}
