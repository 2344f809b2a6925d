//! In-memory [`TreeStore`] with an optional JSON snapshot file.

use super::snapshot::{read_snapshot, write_snapshot, Snapshot};
use super::{Mutation, TreeStore};
use crate::error::IpamError;
use crate::models::{Ipv4, Router, Subnet};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default, Clone)]
struct State {
    subnets: BTreeMap<Ipv4, Subnet>,
    routers: Vec<Router>,
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, IpamError> {
        let mut subnets = BTreeMap::new();
        for subnet in snapshot.subnets {
            let prefix = subnet.prefix;
            if subnets.insert(prefix, subnet).is_some() {
                return Err(IpamError::Store(format!("duplicate subnet {prefix} in snapshot")));
            }
        }
        Ok(State {
            subnets,
            routers: snapshot.routers,
        })
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            subnets: self.subnets.values().cloned().collect(),
            routers: self.routers.clone(),
        }
    }

    fn apply(&mut self, mutation: Mutation) -> Result<(), IpamError> {
        match mutation {
            Mutation::Insert(subnet) => {
                if self.subnets.contains_key(&subnet.prefix) {
                    return Err(IpamError::Conflict(format!(
                        "subnet {} already exists",
                        subnet.prefix
                    )));
                }
                self.subnets.insert(subnet.prefix, subnet);
            }
            Mutation::Update(prefix, fields) => {
                let subnet = self
                    .subnets
                    .get_mut(&prefix)
                    .ok_or_else(|| IpamError::subnet_not_found(prefix))?;
                fields.apply_to(subnet);
            }
            Mutation::Delete(prefix) => {
                self.subnets
                    .remove(&prefix)
                    .ok_or_else(|| IpamError::subnet_not_found(prefix))?;
            }
        }
        Ok(())
    }
}

/// Subnets indexed by prefix, routers in insertion order.
///
/// Every committed change is written to the snapshot file (when one is set)
/// before it becomes visible to readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    snapshot_file: Option<PathBuf>,
    /// One commit at a time; readers only wait for the final swap.
    commit_lock: AsyncMutex<()>,
}

impl MemoryStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IpamError> {
        let path = path.as_ref().to_path_buf();
        let state = State::from_snapshot(read_snapshot(&path)?)?;
        Ok(MemoryStore {
            state: RwLock::new(state),
            snapshot_file: Some(path),
            commit_lock: AsyncMutex::new(()),
        })
    }

    /// Build a memory-only store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, IpamError> {
        Ok(MemoryStore {
            state: RwLock::new(State::from_snapshot(snapshot)?),
            snapshot_file: None,
            commit_lock: AsyncMutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read().to_snapshot()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stage a change on a copy, persist it, then swap it in.
    ///
    /// The snapshot file is written on the blocking pool without holding the
    /// state lock, so readers keep seeing the previous state meanwhile.
    async fn commit<F>(&self, change: F) -> Result<(), IpamError>
    where
        F: FnOnce(&mut State) -> Result<(), IpamError> + Send,
    {
        let _commit = self.commit_lock.lock().await;
        let mut staged = self.read().clone();
        change(&mut staged)?;
        if let Some(path) = self.snapshot_file.clone() {
            let snapshot = staged.to_snapshot();
            tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
                .await
                .map_err(|e| IpamError::Store(format!("snapshot writer failed: {e}")))??;
        }
        *self.write() = staged;
        Ok(())
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn find_by_prefix(&self, prefix: Ipv4) -> Result<Option<Subnet>, IpamError> {
        Ok(self.read().subnets.get(&prefix).cloned())
    }

    async fn find_children(&self, parent: Ipv4) -> Result<Vec<Subnet>, IpamError> {
        Ok(self
            .read()
            .subnets
            .values()
            .filter(|s| s.parent == Some(parent))
            .cloned()
            .collect())
    }

    async fn find_roots(&self) -> Result<Vec<Subnet>, IpamError> {
        Ok(self
            .read()
            .subnets
            .values()
            .filter(|s| s.is_root())
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<Subnet>, IpamError> {
        Ok(self.read().subnets.values().cloned().collect())
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), IpamError> {
        let count = batch.len();
        self.commit(|state| batch.into_iter().try_for_each(|m| state.apply(m)))
            .await?;
        log::debug!("Committed batch of {count} mutation(s)");
        Ok(())
    }

    async fn list_routers(&self) -> Result<Vec<Router>, IpamError> {
        Ok(self.read().routers.clone())
    }

    async fn insert_router(&self, router: Router) -> Result<(), IpamError> {
        self.commit(|state| {
            if state.routers.iter().any(|r| r.ip == router.ip) {
                return Err(IpamError::Conflict("Router already exists".to_string()));
            }
            state.routers.push(router);
            Ok(())
        })
        .await
    }

    async fn update_router(&self, router: Router) -> Result<(), IpamError> {
        self.commit(|state| {
            let stored = state
                .routers
                .iter_mut()
                .find(|r| r.ip == router.ip)
                .ok_or_else(|| IpamError::NotFound(format!("router {}", router.ip)))?;
            *stored = router;
            Ok(())
        })
        .await
    }

    async fn delete_router(&self, ip: Ipv4Addr) -> Result<usize, IpamError> {
        let mut removed = 0;
        self.commit(|state| {
            let before = state.routers.len();
            state.routers.retain(|r| r.ip != ip);
            removed = before - state.routers.len();
            Ok(())
        })
        .await?;
        Ok(removed)
    }
}
