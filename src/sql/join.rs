//! Join operators
//!
//! Hash join for equi-joins (build side hashed, NULL keys excluded from
//! the build; unmatched rows padded with NULLs per join type) and a
//! nested-loop join for arbitrary ON conditions.

use ahash::AHashMap;

use crate::error::Result;
use crate::sql::ast::{ColumnRef, Expr, JoinType};
use crate::sql::evaluator::{is_true, Evaluator, NamedRow};
use crate::types::{HashKey, Value};

/// A row of NULLs under the given column names, for outer-join padding.
fn null_padded(names: &[String]) -> NamedRow {
    let mut row = NamedRow::new();
    for name in names {
        row.push(name.clone(), Value::Null);
    }
    row
}

/// Equi-join: hash the build side (right), probe with the left.
/// LEFT JOIN emits unmatched probe rows padded with NULLs; RIGHT JOIN
/// emits unmatched build rows at the end.
pub fn hash_join(
    probe_rows: &[NamedRow],
    build_rows: &[NamedRow],
    probe_key: &ColumnRef,
    build_key: &ColumnRef,
    probe_names: &[String],
    build_names: &[String],
    join_type: JoinType,
) -> Result<Vec<NamedRow>> {
    // Build phase: key hash -> build row indices. NULL keys never match
    // anything and stay out of the table.
    let mut table: AHashMap<HashKey, Vec<usize>> = AHashMap::new();
    for (i, row) in build_rows.iter().enumerate() {
        let value = row.lookup(build_key)?;
        if let Some(key) = value.hash_key() {
            table.entry(key).or_default().push(i);
        }
    }

    let mut matched_build = vec![false; build_rows.len()];
    let mut out = Vec::with_capacity(probe_rows.len());

    // Probe phase.
    for probe in probe_rows {
        let value = probe.lookup(probe_key)?;
        let hits = value.hash_key().and_then(|key| table.get(&key));
        match hits {
            Some(indices) => {
                for &i in indices {
                    matched_build[i] = true;
                    out.push(probe.clone().merge(build_rows[i].clone()));
                }
            }
            None => {
                if join_type == JoinType::Left {
                    out.push(probe.clone().merge(null_padded(build_names)));
                }
            }
        }
    }

    if join_type == JoinType::Right {
        for (i, row) in build_rows.iter().enumerate() {
            if !matched_build[i] {
                out.push(null_padded(probe_names).merge(row.clone()));
            }
        }
    }

    Ok(out)
}

/// General join over an arbitrary ON expression.
pub fn nested_loop_join(
    left_rows: &[NamedRow],
    right_rows: &[NamedRow],
    on: &Expr,
    evaluator: &Evaluator<'_>,
    left_names: &[String],
    right_names: &[String],
    join_type: JoinType,
) -> Result<Vec<NamedRow>> {
    let mut matched_right = vec![false; right_rows.len()];
    let mut out = Vec::new();

    for left in left_rows {
        let mut matched = false;
        for (j, right) in right_rows.iter().enumerate() {
            let merged = left.clone().merge(right.clone());
            if is_true(&evaluator.eval(on, &merged)?) {
                matched = true;
                matched_right[j] = true;
                out.push(merged);
            }
        }
        if !matched && join_type == JoinType::Left {
            out.push(left.clone().merge(null_padded(right_names)));
        }
    }

    if join_type == JoinType::Right {
        for (j, right) in right_rows.iter().enumerate() {
            if !matched_right[j] {
                out.push(null_padded(left_names).merge(right.clone()));
            }
        }
    }

    Ok(out)
}

/// If the ON condition is a plain equality between two column refs,
/// return them for the hash-join path.
pub fn equi_join_keys(on: &Expr) -> Option<(&ColumnRef, &ColumnRef)> {
    match on {
        Expr::Binary {
            left,
            op: crate::sql::ast::BinaryOp::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(a), Expr::Column(b)) => Some((a, b)),
            _ => None,
        },
        _ => None,
    }
}
