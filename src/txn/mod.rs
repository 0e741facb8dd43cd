//! Transaction management: monotonic txids, snapshots and the commit log

mod clog;
mod manager;

pub use clog::{CommitLog, TxStatus};
pub use manager::{Snapshot, Transaction, TransactionManager, TxState, WriteOp};
