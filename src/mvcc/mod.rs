//! MVCC row store: version chains, visibility and vacuum

mod table;
mod vacuum;
mod version;
mod visibility;

pub use table::Table;
pub use vacuum::{vacuum_table, VacuumStats};
pub use version::RowVersion;
pub use visibility::is_visible;
