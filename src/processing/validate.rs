//! Syntactic checks on addresses and prefix lengths.

use crate::error::IpamError;
use crate::models::{Ipv4, MAX_LENGTH};
use std::net::Ipv4Addr;

/// Accept a dotted-quad IPv4 host address.
pub fn validate_address(s: &str) -> Result<Ipv4Addr, IpamError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| IpamError::InvalidAddress(s.trim().to_string()))
}

/// Accept a prefix length in `0..=32`.
pub fn validate_prefix_length(len: i64) -> Result<u8, IpamError> {
    if (0..=MAX_LENGTH as i64).contains(&len) {
        Ok(len as u8)
    } else {
        Err(IpamError::InvalidPrefixLength(len.to_string()))
    }
}

/// Parse a prefix length written as `26` or `/26`.
pub fn parse_prefix_length(s: &str) -> Result<u8, IpamError> {
    let trimmed = s.trim().trim_start_matches('/');
    let len: i64 = trimmed
        .parse()
        .map_err(|_| IpamError::InvalidPrefixLength(s.trim().to_string()))?;
    validate_prefix_length(len)
}

/// Parse `a.b.c.d/n` into a canonical prefix.
pub fn parse_prefix(s: &str) -> Result<Ipv4, IpamError> {
    let (addr, len) = s
        .trim()
        .split_once('/')
        .ok_or_else(|| IpamError::InvalidPrefixLength(format!("missing length in '{}'", s.trim())))?;
    let addr = validate_address(addr)?;
    let len = parse_prefix_length(len)?;
    Ipv4::from_parts(addr, len)
}
