//! VACUUM: reclaim row versions no live snapshot can reach
//!
//! Works chain by chain against a horizon txid — the smallest txid any
//! live snapshot can still observe (`u64::MAX` when no snapshot is
//! live). Versions superseded before the horizon, versions created by
//! aborted transactions, and whole chains whose deletion predates the
//! horizon are freed in place.

use tracing::debug;

use crate::mvcc::Table;
use crate::txn::CommitLog;
use crate::types::TxId;

/// Per-table vacuum report. Totals describe the table after the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumStats {
    pub table_name: String,
    pub versions_removed: usize,
    pub total_chains: usize,
    pub total_versions: usize,
    pub max_chain_length: usize,
}

/// Run one vacuum pass over a table.
pub fn vacuum_table(table: &mut Table, clog: &CommitLog, horizon: TxId) -> VacuumStats {
    let mut removed = 0usize;
    let mut dead_rows = Vec::new();

    for (row_id, head) in table.chains_mut().iter_mut() {
        // Pass 1: drop versions created by aborted transactions. They are
        // invisible to every snapshot the moment the abort lands.
        removed += strip_aborted(head, clog);
        if head.xmin != 0 && clog.is_aborted(head.xmin) && head.next.is_none() {
            removed += 1;
            dead_rows.push(*row_id);
            continue;
        }

        // Pass 2: a chain whose head was deleted before the horizon is
        // unreachable in its entirety.
        if head.xmax != 0
            && clog.is_committed(head.xmax)
            && head.xmax < horizon
        {
            removed += head.chain_len();
            dead_rows.push(*row_id);
            continue;
        }

        // Pass 3: prune non-head versions superseded before the horizon.
        removed += prune_tail(&mut head.next, clog, horizon);
    }

    for row_id in dead_rows {
        table.physical_delete(row_id);
    }

    let stats = VacuumStats {
        table_name: table.name.clone(),
        versions_removed: removed,
        total_chains: table.chain_count(),
        total_versions: table.total_versions(),
        max_chain_length: table.max_chain_length(),
    };
    debug!(
        table = %stats.table_name,
        removed = stats.versions_removed,
        chains = stats.total_chains,
        "vacuum pass complete"
    );
    stats
}

/// Remove versions past the head whose supersede committed before the
/// horizon. Same unlink-or-descend walk as the aborted filter.
fn prune_tail(
    next: &mut Option<Box<crate::mvcc::RowVersion>>,
    clog: &CommitLog,
    horizon: TxId,
) -> usize {
    let mut removed = 0;
    while let Some(version) = next {
        if version.xmax != 0 && clog.is_committed(version.xmax) && version.xmax < horizon {
            removed += 1;
            *next = version.next.take();
        } else {
            removed += prune_tail(&mut version.next, clog, horizon);
            break;
        }
    }
    removed
}

/// Unlink versions whose creator aborted, clearing tombstones left by
/// aborted supersederes on the survivors. Returns versions removed.
/// A lone aborted head is left in place for the caller to judge.
fn strip_aborted(head: &mut crate::mvcc::RowVersion, clog: &CommitLog) -> usize {
    let mut removed = 0;

    // Promote past aborted heads first.
    while head.xmin != 0 && clog.is_aborted(head.xmin) {
        match head.next.take() {
            Some(next) => {
                *head = *next;
                removed += 1;
            }
            None => return removed,
        }
    }
    if head.xmax != 0 && clog.is_aborted(head.xmax) {
        head.xmax = 0;
    }

    let owner_xmin = head.xmin;
    removed + strip_aborted_tail(&mut head.next, owner_xmin, clog)
}

/// `owner_xmin` is the xmin of the surviving newer version that owns the
/// `next` link; a survivor whose aborted superseder got unlinked is
/// relinked to it so the chain invariant holds.
fn strip_aborted_tail(
    next: &mut Option<Box<crate::mvcc::RowVersion>>,
    owner_xmin: TxId,
    clog: &CommitLog,
) -> usize {
    let mut removed = 0;
    while let Some(version) = next {
        if version.xmin != 0 && clog.is_aborted(version.xmin) {
            removed += 1;
            *next = version.next.take();
        } else {
            if version.xmax != 0 && clog.is_aborted(version.xmax) {
                version.xmax = owner_xmin;
            }
            let next_owner = version.xmin;
            removed += strip_aborted_tail(&mut version.next, next_owner, clog);
            break;
        }
    }
    removed
}
