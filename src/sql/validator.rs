//! Statement validation
//!
//! Checks statements against the catalog before execution: referenced
//! tables and columns exist, aggregate placement is legal, GROUP BY
//! covers the non-aggregate select items, and joined queries do not use
//! ambiguous unqualified names. Unknown columns come back with a
//! fuzzy-matched suggestion when one is close enough.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::ValidationMode;
use crate::error::{DbError, Result, ValidationError, ValidationKind};
use crate::mvcc::Table;
use crate::sql::ast::*;

pub struct Validator<'a> {
    tables: &'a BTreeMap<String, Table>,
    mode: ValidationMode,
}

/// Name scope of one SELECT: (binding name, table) pairs.
struct Scope<'a> {
    bindings: Vec<(String, &'a Table)>,
}

impl<'a> Scope<'a> {
    fn is_join(&self) -> bool {
        self.bindings.len() > 1
    }

    fn all_column_names(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .flat_map(|(_, t)| t.columns().iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Resolve a column reference, enforcing qualification rules.
    fn resolve(&self, col: &ColumnRef) -> std::result::Result<(), ValidationError> {
        match &col.table {
            Some(qualifier) => {
                let table = self
                    .bindings
                    .iter()
                    .find(|(binding, _)| binding == qualifier)
                    .map(|(_, t)| *t)
                    .ok_or_else(|| {
                        ValidationError::new(ValidationKind::TableNotFound, qualifier.clone())
                    })?;
                if table.column(&col.column).is_none() {
                    return Err(unknown_column(&col.display(), &self.all_column_names()));
                }
                Ok(())
            }
            None => {
                let hits = self
                    .bindings
                    .iter()
                    .filter(|(_, t)| t.column(&col.column).is_some())
                    .count();
                match hits {
                    0 => Err(unknown_column(&col.column, &self.all_column_names())),
                    1 => Ok(()),
                    _ => Err(ValidationError::new(
                        ValidationKind::AmbiguousColumn,
                        col.column.clone(),
                    )),
                }
            }
        }
    }
}

fn unknown_column(name: &str, candidates: &[&str]) -> ValidationError {
    let err = ValidationError::new(ValidationKind::ColumnNotFound, name.to_string());
    match closest_match(name, candidates) {
        Some(suggestion) => err.with_hint(suggestion),
        None => err,
    }
}

/// Closest candidate within an edit-distance threshold that scales with
/// the name's length.
fn closest_match(name: &str, candidates: &[&str]) -> Option<String> {
    let threshold = (name.len() / 3).max(1);
    candidates
        .iter()
        .map(|c| (levenshtein_distance(name, c), *c))
        .filter(|(d, _)| *d <= threshold && *d > 0)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

/// Classic two-row Levenshtein distance.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

impl<'a> Validator<'a> {
    pub fn new(tables: &'a BTreeMap<String, Table>, mode: ValidationMode) -> Self {
        Self { tables, mode }
    }

    /// Validate one statement under the configured mode. In `Warnings`
    /// mode every finding is logged and execution proceeds; the executor
    /// may still fail at runtime with the same kind.
    pub fn validate(&self, stmt: &Statement) -> Result<()> {
        if self.mode == ValidationMode::Disabled {
            return Ok(());
        }
        match self.check(stmt) {
            Ok(()) => Ok(()),
            Err(finding) => match self.mode {
                ValidationMode::Strict => Err(DbError::Validation(finding)),
                ValidationMode::Warnings => {
                    warn!(kind = finding.kind.as_str(), ident = %finding.ident, "validation warning");
                    Ok(())
                }
                ValidationMode::Disabled => Ok(()),
            },
        }
    }

    fn check(&self, stmt: &Statement) -> std::result::Result<(), ValidationError> {
        match stmt {
            Statement::Select(select) => self.check_select(select),
            Statement::Insert(insert) => self.check_insert(insert),
            Statement::Update(update) => self.check_update(update),
            Statement::Delete(delete) => self.check_delete(delete),
            Statement::CreateTable(create) => self.check_create_table(create),
            Statement::CreateIndex(create) => {
                let table = self.table(&create.table)?;
                if table.column(&create.column).is_none() {
                    let names: Vec<&str> =
                        table.columns().iter().map(|c| c.name.as_str()).collect();
                    return Err(unknown_column(&create.column, &names));
                }
                Ok(())
            }
            Statement::AlterTable(alter) => self.check_alter(alter),
            Statement::DropTable { table, if_exists } => {
                if !if_exists {
                    self.table(table)?;
                }
                Ok(())
            }
            Statement::Vacuum { table: Some(name) } => self.table(name).map(|_| ()),
            Statement::Describe(name) => self.table(name).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn table(&self, name: &str) -> std::result::Result<&'a Table, ValidationError> {
        self.tables
            .get(name)
            .ok_or_else(|| ValidationError::new(ValidationKind::TableNotFound, name.to_string()))
    }

    fn scope_of(&self, from: &TableRef) -> std::result::Result<Scope<'a>, ValidationError> {
        let mut bindings = Vec::new();
        for (table_name, binding) in from.bindings() {
            let table = self.table(table_name)?;
            bindings.push((binding.to_string(), table));
        }
        Ok(Scope { bindings })
    }

    fn check_select(&self, select: &SelectStmt) -> std::result::Result<(), ValidationError> {
        let scope = self.scope_of(&select.from)?;

        // Join conditions live in the same scope as WHERE.
        self.check_join_conditions(&select.from, &scope)?;

        let has_star = select
            .items
            .iter()
            .any(|item| matches!(item, SelectItem::Star));
        let has_aggregate = select.items.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
            SelectItem::Star => false,
        });
        let grouped = !select.group_by.is_empty();

        if grouped && has_star {
            return Err(ValidationError::new(
                ValidationKind::StarWithGroupBy,
                "*".to_string(),
            ));
        }
        if select.having.is_some() && !grouped {
            return Err(ValidationError::new(
                ValidationKind::HavingWithoutGroupBy,
                "HAVING".to_string(),
            ));
        }
        if !grouped && has_aggregate {
            // Aggregates without GROUP BY collapse to one row; plain
            // column items cannot ride along.
            for item in &select.items {
                if let SelectItem::Expr { expr, .. } = item {
                    if !expr.contains_aggregate() && expr_references_column(expr) {
                        return Err(ValidationError::new(
                            ValidationKind::MixedAggregateAndRegular,
                            expr.display_name(),
                        ));
                    }
                }
            }
        }

        for col in &select.group_by {
            scope.resolve(col)?;
        }

        if grouped {
            for item in &select.items {
                if let SelectItem::Expr { expr, .. } = item {
                    if !expr.contains_aggregate() {
                        self.check_group_coverage(expr, &select.group_by)?;
                    }
                }
            }
        }

        for item in &select.items {
            if let SelectItem::Expr { expr, .. } = item {
                self.check_expr(expr, &scope, true)?;
            }
        }

        if let Some(where_clause) = &select.where_clause {
            if where_clause.contains_aggregate() {
                return Err(ValidationError::new(
                    ValidationKind::AggregateInWhere,
                    where_clause.display_name(),
                ));
            }
            self.check_expr(where_clause, &scope, false)?;
        }

        if let Some(having) = &select.having {
            self.check_expr(having, &scope, true)?;
        }

        let aggregated = grouped || has_aggregate;
        for item in &select.order_by {
            if item.expr.contains_aggregate() && !aggregated {
                return Err(ValidationError::new(
                    ValidationKind::MixedAggregateAndRegular,
                    item.expr.display_name(),
                ));
            }
            self.check_expr(&item.expr, &scope, true)?;
        }

        Ok(())
    }

    fn check_join_conditions(
        &self,
        from: &TableRef,
        scope: &Scope<'a>,
    ) -> std::result::Result<(), ValidationError> {
        if let TableRef::Join { left, right, on, .. } = from {
            self.check_join_conditions(left, scope)?;
            self.check_join_conditions(right, scope)?;
            self.check_expr(on, scope, false)?;
        }
        Ok(())
    }

    /// Every column reference of a non-aggregate select item must appear
    /// in the GROUP BY list.
    fn check_group_coverage(
        &self,
        expr: &Expr,
        group_by: &[ColumnRef],
    ) -> std::result::Result<(), ValidationError> {
        match expr {
            Expr::Column(col) => {
                let covered = group_by.iter().any(|g| {
                    g.column == col.column
                        && (g.table.is_none() || col.table.is_none() || g.table == col.table)
                });
                if covered {
                    Ok(())
                } else {
                    Err(ValidationError::new(
                        ValidationKind::NonAggregateNotInGroupBy,
                        col.display(),
                    ))
                }
            }
            Expr::Binary { left, right, .. } => {
                self.check_group_coverage(left, group_by)?;
                self.check_group_coverage(right, group_by)
            }
            Expr::Not(inner) | Expr::Neg(inner) => self.check_group_coverage(inner, group_by),
            Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => {
                self.check_group_coverage(expr, group_by)
            }
            _ => Ok(()),
        }
    }

    fn check_expr(
        &self,
        expr: &Expr,
        scope: &Scope<'a>,
        aggregates_allowed: bool,
    ) -> std::result::Result<(), ValidationError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Column(col) => scope.resolve(col),
            Expr::Binary { left, right, .. } => {
                self.check_expr(left, scope, aggregates_allowed)?;
                self.check_expr(right, scope, aggregates_allowed)
            }
            Expr::Not(inner) | Expr::Neg(inner) => {
                self.check_expr(inner, scope, aggregates_allowed)
            }
            Expr::IsNull { expr, .. } => self.check_expr(expr, scope, aggregates_allowed),
            Expr::Like { expr, pattern, .. } => {
                self.check_expr(expr, scope, aggregates_allowed)?;
                self.check_expr(pattern, scope, aggregates_allowed)
            }
            Expr::InList { expr, list, .. } => {
                self.check_expr(expr, scope, aggregates_allowed)?;
                for item in list {
                    self.check_expr(item, scope, aggregates_allowed)?;
                }
                Ok(())
            }
            Expr::InSubquery { expr, query, .. } => {
                self.check_expr(expr, scope, aggregates_allowed)?;
                self.check_select(query)
            }
            Expr::Exists { query, .. } => self.check_select(query),
            Expr::Subquery(query) => self.check_select(query),
            Expr::Aggregate { arg, .. } => {
                if !aggregates_allowed {
                    return Err(ValidationError::new(
                        ValidationKind::AggregateInWhere,
                        expr.display_name(),
                    ));
                }
                if let Some(col) = arg {
                    scope.resolve(col)?;
                }
                Ok(())
            }
        }
    }

    fn check_insert(&self, insert: &InsertStmt) -> std::result::Result<(), ValidationError> {
        let table = self.table(&insert.table)?;
        let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();

        if let Some(columns) = &insert.columns {
            for (i, col) in columns.iter().enumerate() {
                if columns[..i].contains(col) {
                    return Err(ValidationError::new(
                        ValidationKind::DuplicateColumn,
                        col.clone(),
                    ));
                }
                if table.column(col).is_none() {
                    return Err(unknown_column(col, &names));
                }
            }
        }
        Ok(())
    }

    fn check_update(&self, update: &UpdateStmt) -> std::result::Result<(), ValidationError> {
        let table = self.table(&update.table)?;
        let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        let scope = Scope {
            bindings: vec![(update.table.clone(), table)],
        };

        for (i, (col, value)) in update.assignments.iter().enumerate() {
            if update.assignments[..i].iter().any(|(c, _)| c == col) {
                return Err(ValidationError::new(
                    ValidationKind::DuplicateColumn,
                    col.clone(),
                ));
            }
            if table.column(col).is_none() {
                return Err(unknown_column(col, &names));
            }
            if value.contains_aggregate() {
                return Err(ValidationError::new(
                    ValidationKind::AggregateInWhere,
                    value.display_name(),
                ));
            }
            self.check_expr(value, &scope, false)?;
        }

        if let Some(where_clause) = &update.where_clause {
            if where_clause.contains_aggregate() {
                return Err(ValidationError::new(
                    ValidationKind::AggregateInWhere,
                    where_clause.display_name(),
                ));
            }
            self.check_expr(where_clause, &scope, false)?;
        }
        Ok(())
    }

    fn check_delete(&self, delete: &DeleteStmt) -> std::result::Result<(), ValidationError> {
        let table = self.table(&delete.table)?;
        let scope = Scope {
            bindings: vec![(delete.table.clone(), table)],
        };
        if let Some(where_clause) = &delete.where_clause {
            if where_clause.contains_aggregate() {
                return Err(ValidationError::new(
                    ValidationKind::AggregateInWhere,
                    where_clause.display_name(),
                ));
            }
            self.check_expr(where_clause, &scope, false)?;
        }
        Ok(())
    }

    fn check_create_table(
        &self,
        create: &CreateTableStmt,
    ) -> std::result::Result<(), ValidationError> {
        for (i, col) in create.columns.iter().enumerate() {
            if create.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(ValidationError::new(
                    ValidationKind::DuplicateColumn,
                    col.name.clone(),
                ));
            }
        }
        Ok(())
    }

    fn check_alter(&self, alter: &AlterTableStmt) -> std::result::Result<(), ValidationError> {
        let table = self.table(&alter.table)?;
        let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        match &alter.op {
            AlterTableOp::AddColumn(def) => {
                if table.column(&def.name).is_some() {
                    return Err(ValidationError::new(
                        ValidationKind::DuplicateColumn,
                        def.name.clone(),
                    ));
                }
                Ok(())
            }
            AlterTableOp::DropColumn(name) => {
                if table.column(name).is_none() {
                    return Err(unknown_column(name, &names));
                }
                Ok(())
            }
            AlterTableOp::RenameColumn { old, new } => {
                if table.column(old).is_none() {
                    return Err(unknown_column(old, &names));
                }
                if table.column(new).is_some() {
                    return Err(ValidationError::new(
                        ValidationKind::DuplicateColumn,
                        new.clone(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn expr_references_column(expr: &Expr) -> bool {
    match expr {
        Expr::Column(_) => true,
        Expr::Binary { left, right, .. } => {
            expr_references_column(left) || expr_references_column(right)
        }
        Expr::Not(inner) | Expr::Neg(inner) => expr_references_column(inner),
        Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => expr_references_column(expr),
        Expr::InList { expr, .. } | Expr::InSubquery { expr, .. } => expr_references_column(expr),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql;
    use crate::types::{Column, DataType};

    fn catalog() -> BTreeMap<String, Table> {
        let mut tables = BTreeMap::new();
        tables.insert(
            "users".to_string(),
            Table::new(
                "users",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("name", DataType::Text),
                    Column::new("department", DataType::Text),
                ],
                true,
            ),
        );
        tables.insert(
            "orders".to_string(),
            Table::new(
                "orders",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("user_id", DataType::Int),
                    Column::new("total", DataType::Float),
                ],
                true,
            ),
        );
        tables
    }

    fn validate(sql_text: &str) -> Result<()> {
        let tables = catalog();
        let stmt = sql::parse(sql_text).unwrap();
        Validator::new(&tables, ValidationMode::Strict).validate(&stmt)
    }

    fn kind_of(result: Result<()>) -> ValidationKind {
        match result.unwrap_err() {
            DbError::Validation(v) => v.kind,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_statements_pass() {
        assert!(validate("SELECT id, name FROM users WHERE id > 1").is_ok());
        assert!(validate("SELECT department, COUNT(*) FROM users GROUP BY department").is_ok());
        assert!(validate(
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id"
        )
        .is_ok());
        assert!(validate("INSERT INTO users (id, name) VALUES (1, 'a')").is_ok());
    }

    #[test]
    fn test_unknown_table() {
        assert_eq!(
            kind_of(validate("SELECT * FROM missing")),
            ValidationKind::TableNotFound
        );
    }

    #[test]
    fn test_unknown_column_with_suggestion() {
        let err = validate("SELECT nme FROM users").unwrap_err();
        match err {
            DbError::Validation(v) => {
                assert_eq!(v.kind, ValidationKind::ColumnNotFound);
                assert_eq!(v.hint.as_deref(), Some("name"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_in_where_rejected() {
        assert_eq!(
            kind_of(validate("SELECT id FROM users WHERE COUNT(*) > 1")),
            ValidationKind::AggregateInWhere
        );
    }

    #[test]
    fn test_star_with_group_by_rejected() {
        assert_eq!(
            kind_of(validate("SELECT * FROM users GROUP BY department")),
            ValidationKind::StarWithGroupBy
        );
    }

    #[test]
    fn test_having_requires_group_by() {
        assert_eq!(
            kind_of(validate("SELECT id FROM users HAVING COUNT(*) > 1")),
            ValidationKind::HavingWithoutGroupBy
        );
    }

    #[test]
    fn test_non_aggregate_must_be_grouped() {
        assert_eq!(
            kind_of(validate(
                "SELECT name, COUNT(*) FROM users GROUP BY department"
            )),
            ValidationKind::NonAggregateNotInGroupBy
        );
    }

    #[test]
    fn test_mixed_aggregate_and_regular() {
        assert_eq!(
            kind_of(validate("SELECT name, COUNT(*) FROM users")),
            ValidationKind::MixedAggregateAndRegular
        );
    }

    #[test]
    fn test_ambiguous_column_in_join() {
        assert_eq!(
            kind_of(validate(
                "SELECT id FROM users u JOIN orders o ON u.id = o.user_id"
            )),
            ValidationKind::AmbiguousColumn
        );
    }

    #[test]
    fn test_duplicate_insert_columns() {
        assert_eq!(
            kind_of(validate("INSERT INTO users (id, id) VALUES (1, 2)")),
            ValidationKind::DuplicateColumn
        );
    }

    #[test]
    fn test_duplicate_update_assignments() {
        assert_eq!(
            kind_of(validate("UPDATE users SET name = 'a', name = 'b'")),
            ValidationKind::DuplicateColumn
        );
    }

    #[test]
    fn test_warnings_mode_logs_and_continues() {
        let tables = catalog();
        let stmt = sql::parse("SELECT missing FROM users").unwrap();
        let validator = Validator::new(&tables, ValidationMode::Warnings);
        assert!(validator.validate(&stmt).is_ok());
    }

    #[test]
    fn test_disabled_mode_skips_everything() {
        let tables = catalog();
        let stmt = sql::parse("SELECT whatever FROM nowhere").unwrap();
        let validator = Validator::new(&tables, ValidationMode::Disabled);
        assert!(validator.validate(&stmt).is_ok());
    }

    #[test]
    fn test_subqueries_validated_recursively() {
        assert_eq!(
            kind_of(validate(
                "SELECT id FROM users WHERE id IN (SELECT bogus FROM orders)"
            )),
            ValidationKind::ColumnNotFound
        );
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("email", "emial"), 2);
    }
}
