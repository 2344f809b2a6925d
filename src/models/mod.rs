//! Domain models for the subnet hierarchy.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`Ipv4`] - canonical IPv4 prefix in CIDR notation
//! - [`Subnet`] - a node of the subnet forest
//! - [`Router`] - a device queried during live scans

mod ipv4;
mod router;
mod subnet;

// Re-export public types
pub use ipv4::{cut_addr, lo_mask, Ipv4, MAX_LENGTH};
pub use router::{Router, Vendor, MAX_ROUTERS};
pub use subnet::{OnlineStatus, Subnet, SubnetDraft, SubnetFields};
