//! Free space finding inside a subnet.
//!
//! Walks the allocated children in address order and fills every gap with the
//! largest aligned CIDR blocks that fit.

use crate::models::{lo_mask, Ipv4, MAX_LENGTH};
use crate::processing::utilization::maximal_prefixes;
use std::net::Ipv4Addr;

/// Unallocated CIDR blocks of `parent`, in address order.
///
/// # Arguments
///
/// * `parent` - the range to search
/// * `children` - allocated prefixes; nested ones and those outside `parent` are ignored
///
/// # Returns
///
/// The largest aligned blocks that fill each gap between children.
pub fn free_blocks(parent: Ipv4, children: &[Ipv4]) -> Vec<Ipv4> {
    let mut blocks = Vec::new();
    let mut next_ip = u32::from(parent.lo()) as u64;
    let end = u32::from(parent.hi()) as u64 + 1;

    // Sorted by address, and maximal so ranges never overlap.
    let allocated = maximal_prefixes(parent, children);
    let boundaries = allocated
        .iter()
        .map(|c| (u32::from(c.lo()) as u64, u32::from(c.hi()) as u64 + 1))
        .chain(std::iter::once((end, end)));

    for (lo, after) in boundaries {
        while next_ip < lo {
            let start = Ipv4Addr::from(next_ip as u32);
            let mask = find_biggest_block(start, parent.mask(), lo);
            blocks.extend(Ipv4::from_parts(start, mask));
            next_ip += 1u64 << (MAX_LENGTH - mask);
        }
        next_ip = next_ip.max(after);
    }

    blocks
}

/// Find the biggest aligned block starting at `start_ip` that ends before `limit`.
///
/// The returned mask is constrained by:
/// 1. The `start_mask` parameter (won't return a shorter mask)
/// 2. The IP alignment - `start_ip` must be a valid network address for the mask
/// 3. The block must end before the exclusive address `limit`
fn find_biggest_block(start_ip: Ipv4Addr, start_mask: u8, limit: u64) -> u8 {
    let start = u32::from(start_ip) as u64;
    let mut next_mask = start_mask.max(lo_mask(start_ip));

    while next_mask < MAX_LENGTH && start + (1u64 << (MAX_LENGTH - next_mask)) > limit {
        next_mask += 1;
    }

    next_mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nets(list: &[&str]) -> Vec<Ipv4> {
        list.iter().map(|s| Ipv4::new(s).unwrap()).collect()
    }

    #[test]
    fn test_find_biggest_block() {
        let start_ip = Ipv4Addr::new(10, 0, 0, 0);
        let limit = u32::from(Ipv4Addr::new(10, 0, 1, 0)) as u64;
        assert_eq!(24, find_biggest_block(start_ip, 8, limit));
        assert_eq!(28, find_biggest_block(start_ip, 28, limit));

        // 10.11.12.16 has 4 trailing zeros, so min mask = 28
        let start_ip = Ipv4Addr::new(10, 11, 12, 16);
        let limit = u32::from(Ipv4Addr::new(10, 11, 16, 0)) as u64;
        assert_eq!(28, find_biggest_block(start_ip, 8, limit));

        // 10.11.12.0 can be a /22 network address
        let start_ip = Ipv4Addr::new(10, 11, 12, 0);
        assert_eq!(22, find_biggest_block(start_ip, 8, limit));
    }

    #[test]
    fn test_free_blocks_empty_parent() {
        let parent = Ipv4::new("10.0.0.0/24").unwrap();
        assert_eq!(free_blocks(parent, &[]), vec![parent]);
    }

    #[test]
    fn test_free_blocks_around_children() {
        let parent = Ipv4::new("10.0.0.0/24").unwrap();
        let children = nets(&["10.0.0.64/26", "10.0.0.192/27"]);
        assert_eq!(
            free_blocks(parent, &children),
            nets(&["10.0.0.0/26", "10.0.0.128/26", "10.0.0.224/27"])
        );
    }

    #[test]
    fn test_free_blocks_unaligned_gap() {
        let parent = Ipv4::new("10.6.0.0/16").unwrap();
        let children = nets(&["10.6.0.0/24", "10.6.2.0/28", "10.6.2.64/28"]);
        assert_eq!(
            free_blocks(parent, &children),
            nets(&[
                "10.6.1.0/24",
                "10.6.2.16/28",
                "10.6.2.32/27",
                "10.6.2.80/28",
                "10.6.2.96/27",
                "10.6.2.128/25",
                "10.6.3.0/24",
                "10.6.4.0/22",
                "10.6.8.0/21",
                "10.6.16.0/20",
                "10.6.32.0/19",
                "10.6.64.0/18",
                "10.6.128.0/17",
            ])
        );
    }

    #[test]
    fn test_free_blocks_full_and_nested() {
        let parent = Ipv4::new("10.0.0.0/24").unwrap();
        let children = nets(&["10.0.0.0/25", "10.0.0.0/26", "10.0.0.128/25"]);
        assert!(free_blocks(parent, &children).is_empty());

        let top = Ipv4::new("255.255.255.0/24").unwrap();
        let children = nets(&["255.255.255.0/25"]);
        assert_eq!(free_blocks(top, &children), nets(&["255.255.255.128/25"]));
    }
}
