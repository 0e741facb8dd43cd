//! veldb — embedded relational database engine
//!
//! Single-process storage engine with an SQL surface:
//! - MVCC row store: version chains with snapshot visibility
//! - Transaction manager with a persistent commit log (CLOG)
//! - Write-ahead log with segment rotation and crash recovery
//! - VACUUM and auto-vacuum garbage collection
//! - Secondary B-tree indexes and per-dimension HNSW vector search
//! - Volcano-style executor: joins (nested-loop and hash), grouping,
//!   ordering, subqueries
//!
//! ## Example
//!
//! ```no_run
//! # fn run() -> veldb::Result<()> {
//! use veldb::{Database, DbConfig};
//!
//! let mut db = Database::open("./data", DbConfig::default())?;
//! db.execute("CREATE TABLE users (id INT, name TEXT)")?;
//! db.execute("INSERT INTO users VALUES (1, 'alice')")?;
//! let result = db.execute("SELECT name FROM users WHERE id = 1")?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod database;
pub mod index;
pub mod mvcc;
pub mod sql;
pub mod txn;
pub mod types;
pub mod wal;

mod error;

pub use config::{AutoVacuumConfig, DbConfig, ValidationMode, WalConfig};
pub use database::Database;
pub use error::{DbError, Result, ValidationError, ValidationKind};
pub use mvcc::VacuumStats;
pub use sql::QueryResult;
pub use types::{Column, DataType, Row, RowId, TxId, Value};
