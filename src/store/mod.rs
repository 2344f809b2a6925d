//! Persistent keyed store of subnet and router records.
//!
//! - [`TreeStore`] - the store interface the engine is written against
//! - [`MemoryStore`] - in-memory implementation with an optional JSON snapshot file

mod memory;
mod snapshot;

use crate::error::IpamError;
use crate::models::{Ipv4, Router, Subnet, SubnetFields};
use async_trait::async_trait;
use std::net::Ipv4Addr;

pub use memory::MemoryStore;
pub use snapshot::{read_snapshot, write_snapshot, Snapshot};

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Fails with `Conflict` if the prefix exists.
    Insert(Subnet),
    /// Fails with `NotFound` if the prefix is absent.
    Update(Ipv4, SubnetFields),
    /// Fails with `NotFound` if the prefix is absent.
    Delete(Ipv4),
}

/// Records keyed by canonical prefix (subnets) or management IP (routers).
///
/// [`TreeStore::apply`] must commit a batch all-or-none.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn find_by_prefix(&self, prefix: Ipv4) -> Result<Option<Subnet>, IpamError>;

    async fn find_children(&self, parent: Ipv4) -> Result<Vec<Subnet>, IpamError>;

    async fn find_roots(&self) -> Result<Vec<Subnet>, IpamError>;

    /// Every subnet record, in any order.
    async fn find_all(&self) -> Result<Vec<Subnet>, IpamError>;

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), IpamError>;

    async fn insert(&self, subnet: Subnet) -> Result<(), IpamError> {
        self.apply(vec![Mutation::Insert(subnet)]).await
    }

    async fn update_fields(&self, prefix: Ipv4, fields: SubnetFields) -> Result<(), IpamError> {
        self.apply(vec![Mutation::Update(prefix, fields)]).await
    }

    async fn delete_many(&self, prefixes: &[Ipv4]) -> Result<usize, IpamError> {
        let batch = prefixes.iter().map(|p| Mutation::Delete(*p)).collect();
        self.apply(batch).await?;
        Ok(prefixes.len())
    }

    /// Routers in insertion order; the first is the primary.
    async fn list_routers(&self) -> Result<Vec<Router>, IpamError>;

    async fn insert_router(&self, router: Router) -> Result<(), IpamError>;

    async fn update_router(&self, router: Router) -> Result<(), IpamError>;

    async fn delete_router(&self, ip: Ipv4Addr) -> Result<usize, IpamError>;
}
