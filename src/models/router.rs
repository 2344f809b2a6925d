//! Router records used for live scans.

use crate::error::IpamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum number of routers: one primary and one backup.
pub const MAX_ROUTERS: usize = 2;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Juniper,
    Cisco,
    Huawei,
}

impl FromStr for Vendor {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "juniper" => Ok(Vendor::Juniper),
            "cisco" => Ok(Vendor::Cisco),
            "huawei" => Ok(Vendor::Huawei),
            _ => Err(IpamError::InvalidVendor(s.to_string())),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Vendor::Juniper => "juniper",
            Vendor::Cisco => "cisco",
            Vendor::Huawei => "huawei",
        };
        f.write_str(s)
    }
}

/// A router reachable for route queries. `password` holds the sealed secret.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Router {
    pub ip: Ipv4Addr,
    pub name: String,
    pub username: String,
    pub password: String,
    pub vendor: Vendor,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("ip", &self.ip)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<sealed>")
            .field("vendor", &self.vendor)
            .finish()
    }
}
