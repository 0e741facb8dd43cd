//! Abstract syntax tree for SQL statements

use crate::types::{DataType, Value};

/// Top-level SQL statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    DropTable { table: String, if_exists: bool },
    AlterTable(AlterTableStmt),
    CreateIndex(CreateIndexStmt),
    DropIndex { index: String },
    Begin,
    Commit,
    Rollback,
    Vacuum { table: Option<String> },
    ShowTables,
    Describe(String),
}

/// SELECT statement.
#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: TableRef,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<ColumnRef>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<usize>,
}

/// Table reference in FROM (a table or a join tree).
#[derive(Debug, Clone)]
pub enum TableRef {
    Table {
        name: String,
        alias: Option<String>,
    },
    Join {
        left: Box<TableRef>,
        right: Box<TableRef>,
        join_type: JoinType,
        on: Expr,
    },
}

impl TableRef {
    /// Every (table, binding-name) pair in this reference tree.
    pub fn bindings(&self) -> Vec<(&str, &str)> {
        match self {
            TableRef::Table { name, alias } => {
                vec![(name.as_str(), alias.as_deref().unwrap_or(name.as_str()))]
            }
            TableRef::Join { left, right, .. } => {
                let mut out = left.bindings();
                out.extend(right.bindings());
                out
            }
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, TableRef::Join { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub expr: Expr,
    pub asc: bool,
}

/// A possibly-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn display(&self) -> String {
        match &self.table {
            Some(t) => format!("{}.{}", t, self.column),
            None => self.column.clone(),
        }
    }
}

/// INSERT statement; `columns: None` means positional against the full
/// column list.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Embedding columns may declare their dimension.
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AlterTableStmt {
    pub table: String,
    pub op: AlterTableOp,
}

#[derive(Debug, Clone)]
pub enum AlterTableOp {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { old: String, new: String },
}

#[derive(Debug, Clone)]
pub struct CreateIndexStmt {
    pub index: String,
    pub table: String,
    pub column: String,
}

/// Expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Column(ColumnRef),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        query: Box<SelectStmt>,
        negated: bool,
    },
    Exists {
        query: Box<SelectStmt>,
        negated: bool,
    },
    /// Scalar subquery: at most one row, exactly one column.
    Subquery(Box<SelectStmt>),
    /// Aggregate call; `arg: None` is COUNT(*).
    Aggregate {
        func: AggFunc,
        arg: Option<ColumnRef>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Operator precedence, higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div => 5,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

impl Expr {
    /// Display name used for result column headers and for resolving
    /// aggregates after the aggregation pass (`COUNT(*)`, `AVG(price)`).
    pub fn display_name(&self) -> String {
        match self {
            Expr::Column(col) => col.display(),
            Expr::Literal(v) => v.to_string(),
            Expr::Aggregate { func, arg } => match arg {
                Some(col) => format!("{}({})", func.name(), col.display()),
                None => format!("{}(*)", func.name()),
            },
            Expr::Binary { left, op, right } => format!(
                "{} {} {}",
                left.display_name(),
                op.symbol(),
                right.display_name()
            ),
            Expr::Not(inner) => format!("NOT {}", inner.display_name()),
            Expr::Neg(inner) => format!("-{}", inner.display_name()),
            Expr::IsNull { expr, negated } => format!(
                "{} IS {}NULL",
                expr.display_name(),
                if *negated { "NOT " } else { "" }
            ),
            Expr::Like { expr, .. } => format!("{} LIKE ...", expr.display_name()),
            Expr::InList { expr, .. } | Expr::InSubquery { expr, .. } => {
                format!("{} IN (...)", expr.display_name())
            }
            Expr::Exists { .. } => "EXISTS (...)".to_string(),
            Expr::Subquery(_) => "(subquery)".to_string(),
        }
    }

    /// Whether this expression contains an aggregate call anywhere.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Not(inner) | Expr::Neg(inner) => inner.contains_aggregate(),
            Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => expr.contains_aggregate(),
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|e| e.contains_aggregate())
            }
            Expr::InSubquery { expr, .. } => expr.contains_aggregate(),
            _ => false,
        }
    }
}
