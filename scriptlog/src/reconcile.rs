//! Set arithmetic between the changes a source knows about and the changes a changelog recorded.

use crate::core::Change;
use std::collections::HashSet;

/// Every change in `all` whose id does not appear in `changelog`, sorted by id.
pub fn compute_pending(all: Vec<Change>, changelog: &[Change]) -> Vec<Change> {
    let applied: HashSet<u64> = changelog.iter().map(|c| c.id).collect();
    let mut pending: Vec<Change> = all
        .into_iter()
        .filter(|c| !applied.contains(&c.id))
        .collect();
    pending.sort();
    pending
}

/// Every change in `all` newer than the newest change in `changelog`, sorted by id.
/// Older unapplied changes are left out.
pub fn compute_newer(all: Vec<Change>, changelog: &[Change]) -> Vec<Change> {
    let last_applied = changelog.iter().map(|c| c.id).max();
    let mut newer: Vec<Change> = all
        .into_iter()
        .filter(|c| last_applied.map_or(true, |last| c.id > last))
        .collect();
    newer.sort();
    newer
}
