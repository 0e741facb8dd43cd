//! Write-ahead log: framed records, rotating segment writer, reader and
//! crash recovery

mod reader;
mod record;
mod recovery;
mod writer;

pub use reader::WalReader;
pub use record::{WalPayload, WalRecord, WalRecordKind};
pub use recovery::{replay, RecoveryOutcome};
pub use writer::WalWriter;
