//! Subnet hierarchy logic.
//!
//! This module contains the algorithms behind every structural operation:
//! - [`validate`] - address and prefix length checks
//! - [`placement`] - where a new subnet goes and which children it adopts
//! - [`utilization`] - non-overlapping address-space usage
//! - [`subdivide`] - splitting a subnet into equal children
//! - [`free_space`] - unallocated blocks inside a subnet

pub mod free_space;
pub mod placement;
pub mod subdivide;
pub mod utilization;
pub mod validate;

// Re-export public functions
pub use free_space::free_blocks;
pub use placement::{plan_placement, PlacementPlan};
pub use subdivide::{child_count, subdivide};
pub use utilization::{maximal_prefixes, round2, utilization};
pub use validate::{parse_prefix, parse_prefix_length, validate_address, validate_prefix_length};
