//! Snapshot visibility
//!
//! The rule at the heart of MVCC correctness: which row versions a
//! snapshot may observe, given the commit log.

use crate::mvcc::RowVersion;
use crate::txn::{CommitLog, Snapshot};

/// True iff `version` is visible to `snapshot` under `clog`.
///
/// Creator side: a version is created-visible when the snapshot's own
/// transaction wrote it, or when its creator committed, was not in
/// progress at snapshot time, and began before the snapshot owner
/// (txids are monotonic, so any id at or above the owner's started
/// after the snapshot was taken).
///
/// Superseder side: a created-visible version stays visible unless its
/// xmax transaction is the owner itself (own delete), or committed and
/// visible under the same horizon rules. Aborted supersederes never hide
/// a version; aborted creators never show one.
pub fn is_visible(version: &RowVersion, snapshot: &Snapshot, clog: &CommitLog) -> bool {
    let creator_visible = if version.xmin == snapshot.txid {
        true
    } else {
        clog.is_committed(version.xmin)
            && !snapshot.active.contains(&version.xmin)
            && version.xmin < snapshot.txid
    };
    if !creator_visible {
        return false;
    }

    if version.xmax == 0 {
        return true;
    }
    if version.xmax == snapshot.txid {
        // Deleted or superseded by our own transaction.
        return false;
    }

    let superseder_visible = clog.is_committed(version.xmax)
        && !snapshot.active.contains(&version.xmax)
        && version.xmax < snapshot.txid;
    !superseder_visible
}
