//! IPv4 subnet hierarchy and utilization engine.
//!
//! Subnets form a forest keyed by prefix. Inserting a subnet attaches it to
//! its most specific existing ancestor, subdividing creates equal children,
//! and every structural change refreshes the parent's offline utilization.
//! Live scans ask a primary (then backup) router which routes exist inside a
//! subnet.
//!
//! - [`models`] - prefixes, subnet and router records
//! - [`processing`] - pure hierarchy algorithms
//! - [`store`] - the [`TreeStore`] interface and its in-memory implementation
//! - [`hierarchy`] - [`SubnetTree`], the locked mutation engine
//! - [`routers`] - router registry and [`SecretCipher`]
//! - [`device`] - [`DeviceProbe`] and reconciliation
//! - [`output`] - CSV listings for the command line

pub mod config;
pub mod device;
pub mod error;
pub mod hierarchy;
mod locks;
pub mod models;
pub mod output;
pub mod processing;
pub mod routers;
pub mod store;

pub use config::Settings;
pub use device::{
    CancelSignal, CommandProbe, DeviceProbe, ProbeError, ProbeTarget, Reconciler, ScanOutcome,
};
pub use error::{ErrorKind, IpamError};
pub use hierarchy::SubnetTree;
pub use models::{Ipv4, OnlineStatus, Router, Subnet, SubnetDraft, Vendor};
pub use routers::{NewRouter, RouterRegistry, RouterUpdate, SecretCipher};
pub use store::{MemoryStore, TreeStore};
