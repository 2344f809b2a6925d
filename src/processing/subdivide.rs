//! Splitting a subnet into equal children.

use crate::error::IpamError;
use crate::models::{Ipv4, SubnetDraft, MAX_LENGTH};
use std::net::Ipv4Addr;

/// Number of children `subdivide(prefix, new_len)` would produce.
pub fn child_count(prefix: Ipv4, new_len: u8) -> Result<u64, IpamError> {
    if new_len <= prefix.mask() || new_len > MAX_LENGTH {
        return Err(IpamError::InvalidPrefixLength(format!(
            "/{new_len} can't subdivide {prefix}, expected {} to {MAX_LENGTH}",
            prefix.mask() + 1
        )));
    }
    Ok(1u64 << (new_len - prefix.mask()))
}

/// Contiguous, equal-sized children of length `new_len` covering `prefix`.
///
/// Each child starts with empty name and label.
pub fn subdivide(prefix: Ipv4, new_len: u8) -> Result<Vec<SubnetDraft>, IpamError> {
    let count = child_count(prefix, new_len)?;
    let step = 1u64 << (MAX_LENGTH - new_len);
    let start = u32::from(prefix.lo()) as u64;

    (0..count)
        .map(|i| {
            let addr = Ipv4Addr::from((start + i * step) as u32);
            Ipv4::from_parts(addr, new_len).map(SubnetDraft::new)
        })
        .collect()
}
