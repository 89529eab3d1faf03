//! Leaderboard projection.
//!
//! A pure read projection over user aggregates, recomputed on demand.

use crate::UserAggregate;

/// Order aggregates for leaderboard display: `total_items` descending, ties
/// broken by aggregate creation order (the input order, which stores return
/// first-created first; the sort is stable so that order survives).
pub fn rank(mut users: Vec<UserAggregate>) -> Vec<UserAggregate> {
    users.sort_by(|a, b| b.total_items.cmp(&a.total_items));
    users
}

/// Presentational level for a running total: doubling thresholds,
/// `floor(log2(total + 1)) + 1`. Not a pipeline invariant.
pub fn level_for_total(total_items: u64) -> u32 {
    64 - (total_items + 1).leading_zeros()
}
