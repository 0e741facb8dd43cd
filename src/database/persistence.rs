//! Binary table persistence
//!
//! Per-table `.tbl` files in two coexisting formats: a compact snapshot
//! holding only the newest visible version per row, and a full MVCC
//! format holding every version chain with xmin/xmax. Little-endian
//! throughout; a format flag after the version field tells them apart.
//! The `catalog.json` sidecar carries the checkpoint LSN and the index
//! metadata.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{
    read_row, write_row, write_string_u64, write_u32, write_u64, ByteReader,
};
use crate::error::{DbError, Result};
use crate::index::IndexMetadata;
use crate::mvcc::{RowVersion, Table};
use crate::txn::{CommitLog, Snapshot};
use crate::types::{Column, DataType, Lsn};

const TABLE_MAGIC: u32 = u32::from_le_bytes(*b"VLTB");
const TABLE_VERSION: u32 = 1;

const FORMAT_COMPACT: u8 = 0;
const FORMAT_MVCC: u8 = 1;

/// Extension used for table files in the data directory.
pub const TABLE_FILE_EXT: &str = "tbl";

/// Contents of `catalog.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub checkpoint_lsn: Lsn,
    pub indexes: Vec<IndexMetadata>,
}

pub fn save_catalog(path: &Path, catalog: &Catalog) -> Result<()> {
    let json = serde_json::to_string_pretty(catalog)
        .map_err(|e| DbError::Query(format!("catalog serialization failed: {}", e)))?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| DbError::InvalidFileFormat(format!("bad catalog file: {}", e)))
}

fn write_header(buf: &mut Vec<u8>, table: &Table, format: u8) {
    write_u32(buf, TABLE_MAGIC);
    write_u32(buf, TABLE_VERSION);
    buf.push(format);
    write_string_u64(buf, &table.name);
    write_u64(buf, table.next_row_id());
    write_u64(buf, table.columns().len() as u64);
    for column in table.columns() {
        write_string_u64(buf, &column.name);
        buf.push(column.data_type.tag());
        if column.data_type == DataType::Embedding {
            write_u64(buf, column.dimension.unwrap_or(0) as u64);
        }
    }
}

/// Compact snapshot: one row per chain, the newest version visible to
/// the given snapshot.
pub fn save_table_compact(
    table: &Table,
    snapshot: &Snapshot,
    clog: &CommitLog,
    path: &Path,
) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf, table, FORMAT_COMPACT);

    let row_ids = table.visible_row_ids(snapshot, clog);
    let mut body = Vec::new();
    let mut count = 0u64;
    for row_id in row_ids {
        if let Some(row) = table.get(row_id, snapshot, clog) {
            write_u64(&mut body, row_id);
            write_row(&mut body, &row);
            count += 1;
        }
    }
    write_u64(&mut buf, count);
    buf.extend_from_slice(&body);

    std::fs::write(path, buf)?;
    Ok(())
}

/// Full MVCC image: every version chain with xmin/xmax, newest first,
/// each version followed by a next-present byte.
pub fn save_table_mvcc(table: &Table, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf, table, FORMAT_MVCC);

    write_u64(&mut buf, table.chains().len() as u64);
    for (row_id, head) in table.chains() {
        write_u64(&mut buf, *row_id);
        let mut cursor = Some(head);
        while let Some(version) = cursor {
            write_u64(&mut buf, version.xmin);
            write_u64(&mut buf, version.xmax);
            write_row(&mut buf, &version.row);
            let next = version.next.as_deref();
            buf.push(u8::from(next.is_some()));
            cursor = next;
        }
    }

    std::fs::write(path, buf)?;
    Ok(())
}

/// Load a table from either format. `mvcc_enabled` configures the
/// resulting in-memory table, independent of the on-disk format.
pub fn load_table(path: &Path, mvcc_enabled: bool) -> Result<Table> {
    let data = std::fs::read(path)?;
    let mut reader = ByteReader::new(&data);

    let magic = reader.read_u32()?;
    if magic != TABLE_MAGIC {
        return Err(DbError::InvalidFileFormat(format!(
            "bad table magic {:#010x} in {}",
            magic,
            path.display()
        )));
    }
    let version = reader.read_u32()?;
    if version != TABLE_VERSION {
        return Err(DbError::UnsupportedVersion(version));
    }
    let format = reader.read_u8()?;

    let name = reader.read_string_u64()?;
    let next_row_id = reader.read_u64()?;

    let column_count = reader.read_u64()? as usize;
    let mut columns = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let col_name = reader.read_string_u64()?;
        let data_type = DataType::from_tag(reader.read_u8()?)?;
        let dimension = if data_type == DataType::Embedding {
            match reader.read_u64()? as usize {
                0 => None,
                d => Some(d),
            }
        } else {
            None
        };
        columns.push(Column {
            name: col_name,
            data_type,
            dimension,
        });
    }

    let mut table = Table::new(name, columns, mvcc_enabled);
    let row_count = reader.read_u64()? as usize;

    match format {
        FORMAT_COMPACT => {
            for _ in 0..row_count {
                let row_id = reader.read_u64()?;
                let row = read_row(&mut reader)?;
                // Snapshot rows re-enter the store as committed history.
                table.replay_insert(row_id, row, 0);
            }
        }
        FORMAT_MVCC => {
            for _ in 0..row_count {
                let row_id = reader.read_u64()?;
                // Versions are stored newest first; rebuild the chain
                // from the tail up.
                let mut versions = Vec::new();
                loop {
                    let xmin = reader.read_u64()?;
                    let xmax = reader.read_u64()?;
                    let row = read_row(&mut reader)?;
                    let next_present = reader.read_u8()?;
                    versions.push((xmin, xmax, row));
                    if next_present == 0 {
                        break;
                    }
                }
                let mut chain: Option<Box<RowVersion>> = None;
                for (xmin, xmax, row) in versions.into_iter().rev() {
                    chain = Some(Box::new(RowVersion {
                        row_id,
                        xmin,
                        xmax,
                        row,
                        next: chain,
                    }));
                }
                if let Some(head) = chain {
                    table.install_chain(*head);
                }
            }
        }
        other => {
            return Err(DbError::InvalidFileFormat(format!(
                "unknown table format flag {}",
                other
            )));
        }
    }

    if table.next_row_id() < next_row_id {
        table.set_next_row_id(next_row_id);
    }
    Ok(table)
}
