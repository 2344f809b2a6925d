//! Per-root mutual exclusion for hierarchy mutations.

use crate::models::Ipv4;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OwnedMutexGuard};

type RootLockMap = Mutex<HashMap<Ipv4, Arc<AsyncMutex<()>>>>;

/// One async mutex per root prefix, plus one for creating roots.
#[derive(Debug, Default)]
pub(crate) struct RootLocks {
    roots: RootLockMap,
    top: AsyncMutex<()>,
}

impl RootLocks {
    fn handle(&self, root: Ipv4) -> Arc<AsyncMutex<()>> {
        let mut roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        roots.entry(root).or_default().clone()
    }

    pub(crate) async fn lock(&self, root: Ipv4) -> OwnedMutexGuard<()> {
        self.handle(root).lock_owned().await
    }

    /// Lock several roots in ascending order so two batches can't deadlock.
    pub(crate) async fn lock_all(&self, roots: BTreeSet<Ipv4>) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(roots.len());
        for root in roots {
            guards.push(self.lock(root).await);
        }
        guards
    }

    /// Serializes creation of root subnets.
    pub(crate) async fn lock_top(&self) -> AsyncMutexGuard<'_, ()> {
        self.top.lock().await
    }
}
