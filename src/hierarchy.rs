//! The subnet forest engine.
//!
//! [`SubnetTree`] runs every structural operation as one atomic unit: the
//! affected root is locked, the current records are read, a batch of
//! mutations is planned and written with [`TreeStore::apply`].

use crate::error::IpamError;
use crate::locks::RootLocks;
use crate::models::{Ipv4, OnlineStatus, Subnet, SubnetDraft, SubnetFields};
use crate::processing::{self, plan_placement, utilization};
use crate::store::{Mutation, TreeStore};
use chrono::Utc;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

pub const DEFAULT_MAX_SUBDIVIDE_CHILDREN: u64 = 4096;

pub struct SubnetTree {
    store: Arc<dyn TreeStore>,
    locks: RootLocks,
    max_subdivide_children: u64,
}

impl SubnetTree {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        SubnetTree {
            store,
            locks: RootLocks::default(),
            max_subdivide_children: DEFAULT_MAX_SUBDIVIDE_CHILDREN,
        }
    }

    /// Cap the number of children a single subdivide may create.
    pub fn with_subdivide_limit(mut self, max_children: u64) -> Self {
        self.max_subdivide_children = max_children;
        self
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Lock the root that `prefix` belongs to and return the current record.
    async fn lock_root_of(&self, prefix: Ipv4) -> Result<(Subnet, OwnedMutexGuard<()>), IpamError> {
        loop {
            let seen = self.get(prefix).await?;
            let guard = self.locks.lock(seen.root).await;
            match self.store.find_by_prefix(prefix).await? {
                Some(current) if current.root == seen.root => return Ok((current, guard)),
                // Deleted and re-created under another root while we waited.
                Some(_) => continue,
                None => return Err(IpamError::subnet_not_found(prefix)),
            }
        }
    }

    /// Create a top-level ("major") subnet.
    pub async fn add_root(&self, draft: SubnetDraft) -> Result<Subnet, IpamError> {
        let _top = self.locks.lock_top().await;
        let prefix = draft.prefix;

        if self.store.find_by_prefix(prefix).await?.is_some() {
            return Err(IpamError::Conflict(format!("subnet {prefix} already exists")));
        }
        if let Some(other) = self
            .store
            .find_roots()
            .await?
            .into_iter()
            .find(|r| r.prefix.overlaps(&prefix))
        {
            return Err(IpamError::InvalidContainment(format!(
                "{prefix} overlaps root subnet {}",
                other.prefix
            )));
        }

        let subnet = Subnet::root(draft);
        let _guard = self.locks.lock(prefix).await;
        self.store.insert(subnet.clone()).await?;
        log::info!("Added root subnet {prefix}");
        Ok(subnet)
    }

    /// Insert `draft` declared under `upper`, attaching it to its most specific
    /// existing ancestor and adopting the children that fit inside it.
    pub async fn place(&self, draft: SubnetDraft, upper: Ipv4) -> Result<Subnet, IpamError> {
        let (_, _guard) = self.lock_root_of(upper).await?;

        let plan = plan_placement(self.store.as_ref(), draft, upper).await?;
        log::debug!("Placement plan: {plan:?}");
        self.store.apply(plan.mutations()).await?;

        log::info!(
            "Added subnet {} under {} (adopted {}, parent utilization {:.2}%)",
            plan.subnet.prefix,
            plan.parent().unwrap_or(plan.subnet.root),
            plan.reparented.len(),
            plan.parent_utilization
        );
        Ok(plan.subnet)
    }

    /// Break a leaf subnet into `2^(new_len - len)` equal children.
    pub async fn subdivide(&self, prefix: Ipv4, new_len: u8) -> Result<Vec<Subnet>, IpamError> {
        let (parent, _guard) = self.lock_root_of(prefix).await?;

        if !self.store.find_children(prefix).await?.is_empty() {
            return Err(IpamError::HasChildren(prefix));
        }
        let count = processing::child_count(prefix, new_len)?;
        if count > self.max_subdivide_children {
            return Err(IpamError::InvalidPrefixLength(format!(
                "/{new_len} would split {prefix} into {count} subnets, limit is {}",
                self.max_subdivide_children
            )));
        }

        let children: Vec<Subnet> = processing::subdivide(prefix, new_len)?
            .into_iter()
            .map(|draft| Subnet::child(draft, prefix, parent.root))
            .collect();
        let child_prefixes: Vec<Ipv4> = children.iter().map(|c| c.prefix).collect();
        let parent_utilization = utilization(prefix, &child_prefixes);

        let mut batch: Vec<Mutation> = children.iter().cloned().map(Mutation::Insert).collect();
        batch.push(Mutation::Update(
            prefix,
            SubnetFields::offline_utilization(parent_utilization),
        ));
        self.store.apply(batch).await?;

        log::info!("Subdivided {prefix} into {count} x /{new_len}");
        Ok(children)
    }

    /// Delete leaf subnets as one batch and return how many were removed.
    pub async fn delete(&self, prefixes: &[Ipv4]) -> Result<usize, IpamError> {
        let targets: BTreeSet<Ipv4> = prefixes.iter().copied().collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let (records, _guards) = loop {
            let roots = self.roots_of(&targets).await?;
            let guards = self.locks.lock_all(roots.clone()).await;
            let records = self.records_of(&targets).await?;
            if records.values().map(|s| s.root).collect::<BTreeSet<_>>() == roots {
                break (records, guards);
            }
        };

        for target in &targets {
            if !self.store.find_children(*target).await?.is_empty() {
                return Err(IpamError::HasChildren(*target));
            }
        }

        let mut batch: Vec<Mutation> = targets.iter().map(|p| Mutation::Delete(*p)).collect();
        let former_parents: BTreeSet<Ipv4> = records
            .values()
            .filter_map(|s| s.parent)
            .filter(|p| !targets.contains(p))
            .collect();
        for parent in former_parents {
            let remaining: Vec<Ipv4> = self
                .store
                .find_children(parent)
                .await?
                .into_iter()
                .map(|c| c.prefix)
                .filter(|c| !targets.contains(c))
                .collect();
            batch.push(Mutation::Update(
                parent,
                SubnetFields::offline_utilization(utilization(parent, &remaining)),
            ));
        }
        self.store.apply(batch).await?;

        log::info!(
            "Deleted {} subnet(s): {}",
            targets.len(),
            targets.iter().join(", ")
        );
        Ok(targets.len())
    }

    async fn records_of(&self, targets: &BTreeSet<Ipv4>) -> Result<BTreeMap<Ipv4, Subnet>, IpamError> {
        let mut records = BTreeMap::new();
        for target in targets {
            records.insert(*target, self.get(*target).await?);
        }
        Ok(records)
    }

    async fn roots_of(&self, targets: &BTreeSet<Ipv4>) -> Result<BTreeSet<Ipv4>, IpamError> {
        Ok(self.records_of(targets).await?.values().map(|s| s.root).collect())
    }

    /// Change the name and/or label of a subnet. `None` keeps the current value.
    pub async fn update_details(
        &self,
        prefix: Ipv4,
        name: Option<String>,
        label: Option<String>,
    ) -> Result<Subnet, IpamError> {
        let (_, _guard) = self.lock_root_of(prefix).await?;
        let fields = SubnetFields {
            name: name.map(|n| n.trim().to_string()),
            label: label.map(|l| l.trim().to_string()),
            ..Default::default()
        };
        self.store.update_fields(prefix, fields).await?;
        log::info!("Updated details of {prefix}");
        self.get(prefix).await
    }

    /// Store the outcome of a successful live scan.
    pub(crate) async fn record_scan(
        &self,
        prefix: Ipv4,
        status: OnlineStatus,
        online_utilization: f64,
    ) -> Result<Subnet, IpamError> {
        let (_, _guard) = self.lock_root_of(prefix).await?;
        let fields = SubnetFields {
            online_status: Some(status),
            online_utilization: Some(online_utilization),
            last_scanned: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_fields(prefix, fields).await?;
        log::info!("Scanned {prefix}: {status} {online_utilization:.2}%");
        self.get(prefix).await
    }

    pub async fn get(&self, prefix: Ipv4) -> Result<Subnet, IpamError> {
        self.store
            .find_by_prefix(prefix)
            .await?
            .ok_or_else(|| IpamError::subnet_not_found(prefix))
    }

    /// Direct children of `prefix`, in address order.
    pub async fn children(&self, prefix: Ipv4) -> Result<Vec<Subnet>, IpamError> {
        self.get(prefix).await?;
        let mut children = self.store.find_children(prefix).await?;
        children.sort_by_key(|c| c.prefix);
        Ok(children)
    }

    pub async fn roots(&self) -> Result<Vec<Subnet>, IpamError> {
        let mut roots = self.store.find_roots().await?;
        roots.sort_by_key(|r| r.prefix);
        Ok(roots)
    }

    /// Unallocated blocks between the children of `prefix`.
    pub async fn free_blocks(&self, prefix: Ipv4) -> Result<Vec<Ipv4>, IpamError> {
        let children: Vec<Ipv4> = self.children(prefix).await?.iter().map(|c| c.prefix).collect();
        Ok(processing::free_blocks(prefix, &children))
    }

    /// Walk the forest from the roots and verify the structural invariants.
    ///
    /// Every stored subnet must be reached by the walk.
    ///
    /// # Returns
    ///
    /// The number of subnets checked, or `Integrity` naming the first violation.
    pub async fn check_integrity(&self) -> Result<usize, IpamError> {
        let roots = self.roots().await?;
        check_siblings(None, &roots)?;

        let mut queue: VecDeque<Subnet> = VecDeque::new();
        for root in roots {
            if root.root != root.prefix {
                return Err(IpamError::Integrity(format!(
                    "root subnet {} points at root {}",
                    root.prefix, root.root
                )));
            }
            queue.push_back(root);
        }

        let mut visited = BTreeSet::new();
        while let Some(node) = queue.pop_front() {
            visited.insert(node.prefix);
            let children = self.children(node.prefix).await?;
            check_siblings(Some(node.prefix), &children)?;

            for child in &children {
                if !child.prefix.strict_subnet_of(&node.prefix) {
                    return Err(IpamError::Integrity(format!(
                        "{} is not inside its parent {}",
                        child.prefix, node.prefix
                    )));
                }
                if child.root != node.root {
                    return Err(IpamError::Integrity(format!(
                        "{} has root {}, expected {}",
                        child.prefix, child.root, node.root
                    )));
                }
            }

            let child_prefixes: Vec<Ipv4> = children.iter().map(|c| c.prefix).collect();
            let expected = utilization(node.prefix, &child_prefixes);
            if node.offline_utilization != expected {
                return Err(IpamError::Integrity(format!(
                    "{} utilization is {:.2}%, children give {expected:.2}%",
                    node.prefix, node.offline_utilization
                )));
            }
            queue.extend(children);
        }

        // Records whose parent chain never reaches a root are invisible to the walk.
        if let Some(orphan) = self
            .store
            .find_all()
            .await?
            .into_iter()
            .filter(|s| !visited.contains(&s.prefix))
            .min_by_key(|s| s.prefix)
        {
            let parent = orphan.parent.map_or("none".to_string(), |p| p.to_string());
            return Err(IpamError::Integrity(format!(
                "{} is not reachable from any root (parent {parent}, root {})",
                orphan.prefix, orphan.root
            )));
        }

        log::info!("Integrity check passed for {} subnet(s)", visited.len());
        Ok(visited.len())
    }
}

/// CIDR blocks are nested or disjoint, so in address order any overlap shows
/// up between neighbours.
fn check_siblings(parent: Option<Ipv4>, siblings: &[Subnet]) -> Result<(), IpamError> {
    for (a, b) in siblings.iter().sorted_by_key(|s| s.prefix).tuple_windows() {
        if a.prefix.overlaps(&b.prefix) {
            let scope = parent.map_or("roots".to_string(), |p| format!("children of {p}"));
            return Err(IpamError::Integrity(format!(
                "{} and {} overlap among {scope}",
                a.prefix, b.prefix
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn ip(s: &str) -> Ipv4 {
        Ipv4::new(s).unwrap()
    }

    async fn tree_with_root(root: &str) -> SubnetTree {
        let tree = SubnetTree::new(Arc::new(MemoryStore::new()));
        tree.add_root(SubnetDraft::new(ip(root))).await.unwrap();
        tree
    }

    #[tokio::test]
    async fn test_add_root_rejects_duplicates_and_overlaps() {
        let tree = tree_with_root("10.0.0.0/8").await;
        let err = tree.add_root(SubnetDraft::new(ip("10.0.0.0/8"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = tree.add_root(SubnetDraft::new(ip("10.4.0.0/16"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContainment);
        let err = tree.add_root(SubnetDraft::new(ip("0.0.0.0/0"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContainment);

        tree.add_root(SubnetDraft::new(ip("192.168.0.0/16"))).await.unwrap();
        let roots: Vec<Ipv4> = tree.roots().await.unwrap().iter().map(|r| r.prefix).collect();
        assert_eq!(roots, vec![ip("10.0.0.0/8"), ip("192.168.0.0/16")]);
    }

    #[tokio::test]
    async fn test_place_reparents_existing_children() {
        let tree = tree_with_root("10.0.0.0/8").await;
        tree.place(SubnetDraft::new(ip("10.0.1.0/24")), ip("10.0.0.0/8"))
            .await
            .unwrap();
        let placed = tree
            .place(SubnetDraft::named(ip("10.0.0.0/16"), "dc1", "datacenter"), ip("10.0.0.0/8"))
            .await
            .unwrap();
        assert_eq!(placed.parent, Some(ip("10.0.0.0/8")));
        assert_eq!(placed.root, ip("10.0.0.0/8"));

        let moved = tree.get(ip("10.0.1.0/24")).await.unwrap();
        assert_eq!(moved.parent, Some(ip("10.0.0.0/16")));
        assert_eq!(tree.get(ip("10.0.0.0/16")).await.unwrap().offline_utilization, 0.39);
        assert_eq!(tree.get(ip("10.0.0.0/8")).await.unwrap().offline_utilization, 0.39);
        assert_eq!(tree.check_integrity().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_subdivide_then_break_rules() {
        let tree = tree_with_root("10.0.0.0/24").await;
        let children = tree.subdivide(ip("10.0.0.0/24"), 26).await.unwrap();
        let prefixes: Vec<String> = children.iter().map(|c| c.prefix.to_string()).collect();
        assert_eq!(
            prefixes,
            vec!["10.0.0.0/26", "10.0.0.64/26", "10.0.0.128/26", "10.0.0.192/26"]
        );
        assert!(children.iter().all(|c| c.name.is_empty() && c.root == ip("10.0.0.0/24")));
        assert_eq!(tree.get(ip("10.0.0.0/24")).await.unwrap().offline_utilization, 100.0);

        let err = tree.subdivide(ip("10.0.0.0/24"), 28).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HasChildren);
        let err = tree.subdivide(ip("10.0.0.64/26"), 26).await.unwrap_err();
        assert_eq!(
            err,
            IpamError::InvalidPrefixLength(
                "/26 can't subdivide 10.0.0.64/26, expected 27 to 32".to_string()
            )
        );
        let err = tree.subdivide(ip("10.9.0.0/26"), 28).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_subdivide_limit() {
        let tree = tree_with_root("10.0.0.0/8").await.with_subdivide_limit(256);
        let err = tree.subdivide(ip("10.0.0.0/8"), 24).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(tree.children(ip("10.0.0.0/8")).await.unwrap().is_empty());
        assert_eq!(tree.subdivide(ip("10.0.0.0/8"), 16).await.unwrap().len(), 256);
    }

    #[tokio::test]
    async fn test_delete_with_children_changes_nothing() {
        let tree = tree_with_root("10.0.0.0/24").await;
        tree.subdivide(ip("10.0.0.0/24"), 25).await.unwrap();

        let err = tree
            .delete(&[ip("10.0.0.0/25"), ip("10.0.0.0/24")])
            .await
            .unwrap_err();
        assert_eq!(err, IpamError::HasChildren(ip("10.0.0.0/24")));
        assert_eq!(tree.children(ip("10.0.0.0/24")).await.unwrap().len(), 2);

        let err = tree.delete(&[ip("10.0.0.0/25"), ip("10.0.1.0/25")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(tree.children(ip("10.0.0.0/24")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_recomputes_surviving_parent() {
        let tree = tree_with_root("10.0.0.0/24").await;
        tree.subdivide(ip("10.0.0.0/24"), 26).await.unwrap();

        let deleted = tree
            .delete(&[ip("10.0.0.0/26"), ip("10.0.0.64/26"), ip("10.0.0.0/26")])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(tree.get(ip("10.0.0.0/24")).await.unwrap().offline_utilization, 50.0);
        assert_eq!(
            tree.free_blocks(ip("10.0.0.0/24")).await.unwrap(),
            vec![ip("10.0.0.0/25")]
        );
        tree.check_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_details() {
        let tree = tree_with_root("10.0.0.0/8").await;
        let updated = tree
            .update_details(ip("10.0.0.0/8"), Some(" corp ".to_string()), None)
            .await
            .unwrap();
        assert_eq!(updated.name, "corp");
        assert_eq!(updated.label, "");
        let err = tree
            .update_details(ip("10.1.0.0/16"), None, Some("x".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_check_integrity_detects_stale_utilization() {
        let store = Arc::new(MemoryStore::new());
        let tree = SubnetTree::new(store.clone());
        tree.add_root(SubnetDraft::new(ip("10.0.0.0/24"))).await.unwrap();
        tree.subdivide(ip("10.0.0.0/24"), 25).await.unwrap();

        store
            .update_fields(ip("10.0.0.0/24"), SubnetFields::offline_utilization(12.0))
            .await
            .unwrap();
        let err = tree.check_integrity().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_integrity_finds_detached_subnets() {
        let store = Arc::new(MemoryStore::new());
        let tree = SubnetTree::new(store.clone());
        tree.add_root(SubnetDraft::new(ip("10.0.0.0/8"))).await.unwrap();
        assert_eq!(tree.check_integrity().await.unwrap(), 1);

        // Parent was never stored, so no walk from a root reaches it.
        store
            .insert(Subnet::child(
                SubnetDraft::new(ip("10.1.0.0/16")),
                ip("10.9.0.0/16"),
                ip("10.0.0.0/8"),
            ))
            .await
            .unwrap();
        let err = tree.check_integrity().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.to_string().contains("10.1.0.0/16"), "{err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_placements_keep_tree_consistent() {
        let tree = Arc::new(tree_with_root("10.0.0.0/16").await);

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let tree = tree.clone();
            handles.push(tokio::spawn(async move {
                let prefix = Ipv4::new(&format!("10.0.{i}.0/24")).unwrap();
                tree.place(SubnetDraft::new(prefix), ip("10.0.0.0/16")).await
            }));
        }
        for i in 0..4u8 {
            let tree = tree.clone();
            handles.push(tokio::spawn(async move {
                let prefix = Ipv4::new(&format!("10.0.{}.0/21", i * 8)).unwrap();
                tree.place(SubnetDraft::new(prefix), ip("10.0.0.0/16")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(tree.check_integrity().await.unwrap(), 37);
        assert_eq!(tree.children(ip("10.0.0.0/16")).await.unwrap().len(), 4);
        assert_eq!(tree.get(ip("10.0.0.0/16")).await.unwrap().offline_utilization, 12.5);
        assert_eq!(tree.get(ip("10.0.8.0/21")).await.unwrap().offline_utilization, 100.0);
    }
}
