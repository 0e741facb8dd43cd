//! Database handle: open/execute/checkpoint/close over the engine

mod core;
pub mod persistence;

pub use core::Database;
