//! Little-endian binary encoding primitives shared by the WAL and the
//! persisted table/CLOG files.

use crate::error::{DbError, Result};
use crate::types::{Row, Value};

/// Value tags as persisted on disk.
pub const TAG_NULL: u8 = 0;
pub const TAG_INT: u8 = 1;
pub const TAG_FLOAT: u8 = 2;
pub const TAG_BOOL: u8 = 3;
pub const TAG_TEXT: u8 = 4;
pub const TAG_EMBEDDING: u8 = 5;
/// WAL-only composite tag: a whole attribute map (insert records).
pub const TAG_ROW: u8 = 6;

/// Cursor over an in-memory byte buffer.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DbError::UnexpectedEof(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    /// String with a u32 length prefix (WAL name fields).
    pub fn read_string_u32(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DbError::InvalidFileFormat(format!("invalid UTF-8 string: {}", e)))
    }

    /// String with a u64 length prefix (table file fields).
    pub fn read_string_u64(&mut self) -> Result<String> {
        let len = self.read_u64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DbError::InvalidFileFormat(format!("invalid UTF-8 string: {}", e)))
    }
}

pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_string_u32(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

pub fn write_string_u64(buf: &mut Vec<u8>, s: &str) {
    write_u64(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Tagged value encoding: tag byte, then per-tag payload. Null is empty,
/// int i64 LE, float f64 LE, bool one byte, text u64 length + bytes,
/// embedding u64 length + f32 LE elements.
pub fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            write_string_u64(buf, s);
        }
        Value::Embedding(v) => {
            buf.push(TAG_EMBEDDING);
            write_u64(buf, v.len() as u64);
            for x in v {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
    }
}

pub fn read_value(reader: &mut ByteReader<'_>) -> Result<Value> {
    let tag = reader.read_u8()?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_INT => Ok(Value::Int(reader.read_u64()? as i64)),
        TAG_FLOAT => Ok(Value::Float(reader.read_f64()?)),
        TAG_BOOL => match reader.read_u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(DbError::InvalidFileFormat(format!(
                "invalid bool byte {}",
                other
            ))),
        },
        TAG_TEXT => Ok(Value::Text(reader.read_string_u64()?)),
        TAG_EMBEDDING => {
            let len = reader.read_u64()? as usize;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(reader.read_f32()?);
            }
            Ok(Value::Embedding(v))
        }
        other => Err(DbError::InvalidFileFormat(format!(
            "unknown value tag {}",
            other
        ))),
    }
}

/// Attribute map encoding used by table file bodies and WAL insert
/// records: u64 count, then {u64-length name, tagged value} per column.
pub fn write_row(buf: &mut Vec<u8>, row: &Row) {
    write_u64(buf, row.len() as u64);
    for (name, value) in row.iter() {
        write_string_u64(buf, name);
        write_value(buf, value);
    }
}

pub fn read_row(reader: &mut ByteReader<'_>) -> Result<Row> {
    let count = reader.read_u64()? as usize;
    let mut row = Row::new();
    for _ in 0..count {
        let name = reader.read_string_u64()?;
        let value = read_value(reader)?;
        if !row.push(name, value) {
            return Err(DbError::InvalidFileFormat(
                "duplicate attribute name in row".into(),
            ));
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) -> Value {
        let mut buf = Vec::new();
        write_value(&mut buf, &value);
        let mut reader = ByteReader::new(&buf);
        read_value(&mut reader).unwrap()
    }

    #[test]
    fn test_value_round_trips() {
        assert_eq!(round_trip(Value::Null), Value::Null);
        assert_eq!(round_trip(Value::Int(-42)), Value::Int(-42));
        assert_eq!(round_trip(Value::Float(3.25)), Value::Float(3.25));
        assert_eq!(round_trip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(
            round_trip(Value::Text("héllo".into())),
            Value::Text("héllo".into())
        );
    }

    #[test]
    fn test_embedding_round_trips_bitwise() {
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Embedding(vec![0.5, -1.0, 2.25]));
        let mut reader = ByteReader::new(&buf);
        match read_value(&mut reader).unwrap() {
            Value::Embedding(v) => assert_eq!(v, vec![0.5, -1.0, 2.25]),
            other => panic!("expected embedding, got {:?}", other),
        }
    }

    #[test]
    fn test_row_round_trips() {
        let mut row = Row::new();
        row.push("id", Value::Int(1));
        row.push("name", Value::Text("widget".into()));
        row.push("price", Value::Float(10.0));

        let mut buf = Vec::new();
        write_row(&mut buf, &row);
        let mut reader = ByteReader::new(&buf);
        let back = read_row(&mut reader).unwrap();
        assert_eq!(back, row);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_eof() {
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Int(7));
        let mut reader = ByteReader::new(&buf[..4]);
        assert!(matches!(
            read_value(&mut reader),
            Err(DbError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let buf = [9u8, 0, 0];
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            read_value(&mut reader),
            Err(DbError::InvalidFileFormat(_))
        ));
    }
}
