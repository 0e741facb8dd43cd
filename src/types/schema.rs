//! Column and data type definitions
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::types::Value;

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Float,
    Text,
    Bool,
    Embedding,
}

impl DataType {
    /// Persisted one-byte tag (see the table file format).
    pub fn tag(&self) -> u8 {
        match self {
            DataType::Int => 0,
            DataType::Float => 1,
            DataType::Text => 2,
            DataType::Bool => 3,
            DataType::Embedding => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DataType::Int),
            1 => Ok(DataType::Float),
            2 => Ok(DataType::Text),
            3 => Ok(DataType::Bool),
            4 => Ok(DataType::Embedding),
            other => Err(DbError::InvalidFileFormat(format!(
                "unknown column type tag {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::Text => "TEXT",
            DataType::Bool => "BOOL",
            DataType::Embedding => "EMBEDDING",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Declared dimension, embedding columns only.
    pub dimension: Option<usize>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            dimension: None,
        }
    }

    pub fn embedding(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Embedding,
            dimension: Some(dimension),
        }
    }

    /// Check a value against this column, coercing where the SQL layer
    /// permits it (int literals into float columns). Returns the value to
    /// store.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        match (&self.data_type, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (DataType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (DataType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (DataType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (DataType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (DataType::Embedding, Value::Embedding(v)) => {
                if let Some(dim) = self.dimension {
                    if v.len() != dim {
                        return Err(DbError::DimensionMismatch {
                            expected: dim,
                            actual: v.len(),
                        });
                    }
                }
                Ok(Value::Embedding(v))
            }
            (_, other) => Err(DbError::TypeError(format!(
                "column '{}' expects {}, got {}",
                self.name,
                self.data_type.name(),
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_int_into_float_column() {
        let col = Column::new("price", DataType::Float);
        assert_eq!(col.coerce(Value::Int(3)).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_coerce_rejects_wrong_type() {
        let col = Column::new("id", DataType::Int);
        assert!(col.coerce(Value::Text("x".into())).is_err());
    }

    #[test]
    fn test_null_fits_any_column() {
        let col = Column::new("name", DataType::Text);
        assert_eq!(col.coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_embedding_dimension_enforced() {
        let col = Column::embedding("vec", 3);
        assert!(col.coerce(Value::Embedding(vec![1.0, 2.0, 3.0])).is_ok());
        let err = col.coerce(Value::Embedding(vec![1.0])).unwrap_err();
        assert!(matches!(
            err,
            DbError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_type_tag_round_trip() {
        for dt in [
            DataType::Int,
            DataType::Float,
            DataType::Text,
            DataType::Bool,
            DataType::Embedding,
        ] {
            assert_eq!(DataType::from_tag(dt.tag()).unwrap(), dt);
        }
        assert!(DataType::from_tag(9).is_err());
    }
}
