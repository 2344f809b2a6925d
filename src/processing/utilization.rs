//! Address-space utilization without double-counting nested allocations.

use crate::models::Ipv4;
use itertools::Itertools;

/// Round a percentage to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Candidates inside `parent` that are not contained in another candidate.
///
/// Candidates that are not strictly narrower than `parent`, or lie outside it,
/// are dropped. Exact duplicates count once. The result is sorted.
pub fn maximal_prefixes(parent: Ipv4, candidates: &[Ipv4]) -> Vec<Ipv4> {
    let inside: Vec<Ipv4> = candidates
        .iter()
        .copied()
        .filter(|c| c.mask() > parent.mask() && c.subnet_of(&parent))
        .sorted()
        .dedup()
        .collect();

    inside
        .iter()
        .copied()
        .filter(|c| !inside.iter().any(|other| c.strict_subnet_of(other)))
        .collect()
}

/// Percentage of `parent` covered by the maximal `candidates`.
///
/// # Arguments
///
/// * `parent` - the subnet being measured
/// * `candidates` - prefixes allocated somewhere below `parent`
///
/// # Returns
///
/// Percentage in `0.0..=100.0` rounded to 2 decimals, without double
/// counting candidates nested in other candidates.
pub fn utilization(parent: Ipv4, candidates: &[Ipv4]) -> f64 {
    let used: u64 = maximal_prefixes(parent, candidates)
        .iter()
        .map(|c| c.num_addresses())
        .sum();
    let total = parent.num_addresses();
    log::trace!("utilization {parent}: {used}/{total} addresses");
    round2(used as f64 / total as f64 * 100.0)
}
