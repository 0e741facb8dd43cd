//! Secondary indexes: ordered B-tree indexes and per-dimension HNSW
//! vector indexes, coordinated by the index manager

mod btree;
mod hnsw;
mod manager;

pub use btree::{BTreeIndex, IndexKey};
pub use hnsw::{HnswConfig, HnswIndex};
pub use manager::{IndexManager, IndexMetadata};
