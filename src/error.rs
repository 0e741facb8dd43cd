//! Error types for the veldb storage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Sub-kinds of validation failures, reported before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    TableNotFound,
    ColumnNotFound,
    AmbiguousColumn,
    DuplicateColumn,
    AggregateInWhere,
    StarWithGroupBy,
    NonAggregateNotInGroupBy,
    MixedAggregateAndRegular,
    HavingWithoutGroupBy,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::TableNotFound => "table-not-found",
            ValidationKind::ColumnNotFound => "column-not-found",
            ValidationKind::AmbiguousColumn => "ambiguous-column",
            ValidationKind::DuplicateColumn => "duplicate-column",
            ValidationKind::AggregateInWhere => "aggregate-in-where",
            ValidationKind::StarWithGroupBy => "star-with-group-by",
            ValidationKind::NonAggregateNotInGroupBy => "non-aggregate-not-in-group-by",
            ValidationKind::MixedAggregateAndRegular => "mixed-aggregate-and-regular",
            ValidationKind::HavingWithoutGroupBy => "having-without-group-by",
        }
    }
}

/// A validation failure with the offending identifier and an optional
/// fuzzy-matched suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub ident: String,
    pub hint: Option<String>,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, ident: impl Into<String>) -> Self {
        Self {
            kind,
            ident: ident.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.ident)?;
        if let Some(hint) = &self.hint {
            write!(f, " (did you mean '{}'?)", hint)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(ValidationError),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Transaction already active")]
    TransactionAlreadyActive,

    #[error("Write conflict on row {row_id}")]
    WriteConflict { row_id: u64 },

    #[error("Scalar subquery returned more than one row")]
    SubqueryMultipleRows,

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Unexpected end of file: {0}")]
    UnexpectedEof(String),

    #[error("CRC mismatch: {0}")]
    CrcMismatch(String),

    #[error("WAL rotation failed: {0}")]
    RotationFailed(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl DbError {
    /// Process exit code for the CLI: 0 success, 1 parse, 2 validation,
    /// 3 runtime, 4 I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            DbError::Parse(_) => 1,
            DbError::Validation(_) => 2,
            DbError::Io(_)
            | DbError::InvalidFileFormat(_)
            | DbError::UnsupportedVersion(_)
            | DbError::UnexpectedEof(_)
            | DbError::CrcMismatch(_)
            | DbError::RotationFailed(_) => 4,
            _ => 3,
        }
    }

    pub fn validation(kind: ValidationKind, ident: impl Into<String>) -> Self {
        DbError::Validation(ValidationError::new(kind, ident))
    }
}
