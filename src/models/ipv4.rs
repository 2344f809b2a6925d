//! IPv4 prefix (CIDR) type and address arithmetic.
//!
//! [`Ipv4`] is always canonical: the host bits of the address are zero, so two
//! spellings of the same network compare equal and can be used as store keys.

use crate::error::IpamError;
use crate::processing::validate;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length for an IPv4 prefix (32 bits).
pub const MAX_LENGTH: u8 = 32;

/// Netmask bits for a prefix length that is already known to be `<= 32`.
fn cidr_mask(len: u8) -> u32 {
    let right_len = MAX_LENGTH - len;
    ((u32::MAX as u64 >> right_len) << right_len) as u32
}

/// Get the network address for a given IP and prefix length.
pub fn cut_addr(addr: Ipv4Addr, len: u8) -> Result<Ipv4Addr, IpamError> {
    if len > MAX_LENGTH {
        return Err(IpamError::InvalidPrefixLength(len.to_string()));
    }
    Ok(Ipv4Addr::from(u32::from(addr) & cidr_mask(len)))
}

/// Shortest prefix length for which `ip` is a valid network address.
pub fn lo_mask(ip: Ipv4Addr) -> u8 {
    let trailing_zeros = u32::from(ip).trailing_zeros() as u8;
    MAX_LENGTH - trailing_zeros
}

/// Canonical IPv4 network prefix, e.g. `10.0.0.0/24`.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct Ipv4 {
    addr: Ipv4Addr,
    mask: u8,
}

impl Ipv4 {
    /// Parse a CIDR string (e.g. "10.0.0.0/24"), zeroing any host bits.
    pub fn new(addr_cidr: &str) -> Result<Ipv4, IpamError> {
        validate::parse_prefix(addr_cidr)
    }

    /// Build a prefix from its parts, zeroing any host bits.
    pub fn from_parts(addr: Ipv4Addr, mask: u8) -> Result<Ipv4, IpamError> {
        let addr = cut_addr(addr, mask)?;
        Ok(Ipv4 { addr, mask })
    }

    /// Network address.
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length.
    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Netmask in dotted-quad form, e.g. `255.255.255.0` for a /24.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(cidr_mask(self.mask))
    }

    /// Lowest (network) address in the range.
    pub fn lo(&self) -> Ipv4Addr {
        self.addr
    }

    /// Highest (broadcast) address in the range.
    pub fn hi(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !cidr_mask(self.mask))
    }

    /// Number of addresses covered, `2^(32 - len)`.
    pub fn num_addresses(&self) -> u64 {
        1u64 << (MAX_LENGTH - self.mask)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & cidr_mask(self.mask) == u32::from(self.addr)
    }

    /// True when this range lies inside `other` (equal ranges included).
    pub fn subnet_of(&self, other: &Ipv4) -> bool {
        other.mask <= self.mask && other.contains(self.addr)
    }

    /// True when `self` is inside `other` and not equal to it.
    pub fn strict_subnet_of(&self, other: &Ipv4) -> bool {
        self.subnet_of(other) && self != other
    }

    pub fn overlaps(&self, other: &Ipv4) -> bool {
        self.subnet_of(other) || other.subnet_of(self)
    }

    /// Containing prefix of length `len`.
    pub fn supernet(&self, len: u8) -> Result<Ipv4, IpamError> {
        if len > self.mask {
            return Err(IpamError::InvalidPrefixLength(format!(
                "/{len} is not a supernet of {self}"
            )));
        }
        Ipv4::from_parts(self.addr, len)
    }
}

impl Serialize for Ipv4 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ipv4 {
    fn deserialize<D>(deserializer: D) -> Result<Ipv4, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ipv4::new(&s).map_err(|e| de::Error::custom(format!("invalid CIDR {s}: {e}")))
    }
}

impl FromStr for Ipv4 {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ipv4::new(s)
    }
}

impl std::fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}
