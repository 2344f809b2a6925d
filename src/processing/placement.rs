//! Placement of a new subnet inside an existing tree.
//!
//! The new prefix is attached to its most specific existing ancestor
//! (longest-prefix-match), and existing children that fit inside it are moved
//! underneath it.

use crate::error::IpamError;
use crate::models::{Ipv4, Subnet, SubnetDraft, SubnetFields};
use crate::processing::utilization::utilization;
use crate::store::{Mutation, TreeStore};

/// Everything needed to insert one subnet, applied as a single batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPlan {
    /// The record to insert, with resolved parent, root and utilization.
    pub subnet: Subnet,
    /// Former children of the resolved parent that move under the new subnet.
    pub reparented: Vec<Ipv4>,
    /// Recomputed utilization of the resolved parent.
    pub parent_utilization: f64,
}

impl PlacementPlan {
    pub fn parent(&self) -> Option<Ipv4> {
        self.subnet.parent
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        let new_prefix = self.subnet.prefix;
        let mut batch = vec![Mutation::Insert(self.subnet.clone())];
        batch.extend(
            self.reparented
                .iter()
                .map(|child| Mutation::Update(*child, SubnetFields::reparent(new_prefix))),
        );
        if let Some(parent) = self.subnet.parent {
            batch.push(Mutation::Update(
                parent,
                SubnetFields::offline_utilization(self.parent_utilization),
            ));
        }
        batch
    }
}

/// Resolve where `draft` goes when declared under `upper`.
///
/// # Arguments
///
/// * `store` - the records to place against; nothing is written
/// * `draft` - the new subnet
/// * `upper` - the subnet the caller declared as the container
///
/// # Returns
///
/// A [`PlacementPlan`] holding the resolved parent, the siblings that move
/// under the new subnet, and both new utilization figures. The first failed
/// precondition wins: `NotFound` for `upper`, then `Conflict`, then
/// `InvalidContainment`.
pub async fn plan_placement(
    store: &dyn TreeStore,
    draft: SubnetDraft,
    upper: Ipv4,
) -> Result<PlacementPlan, IpamError> {
    let new_prefix = draft.prefix;

    let upper_subnet = store
        .find_by_prefix(upper)
        .await?
        .ok_or_else(|| IpamError::subnet_not_found(upper))?;

    if store.find_by_prefix(new_prefix).await?.is_some() {
        return Err(IpamError::Conflict(format!(
            "subnet {new_prefix} already exists"
        )));
    }

    if !new_prefix.strict_subnet_of(&upper) {
        return Err(IpamError::InvalidContainment(format!(
            "{new_prefix} is not inside {upper}"
        )));
    }

    // Descend to the most specific existing subnet that contains the new prefix.
    let mut parent = upper_subnet.prefix;
    let mut siblings = store.find_children(parent).await?;
    while let Some(next) = closer_ancestor(&siblings, new_prefix) {
        log::debug!("{new_prefix}: {next} is a closer ancestor than {parent}");
        parent = next;
        siblings = store.find_children(parent).await?;
    }

    let mut reparented = Vec::new();
    let mut remaining = Vec::new();
    for sibling in &siblings {
        if sibling.prefix.subnet_of(&new_prefix) {
            reparented.push(sibling.prefix);
        } else if sibling.prefix.overlaps(&new_prefix) {
            return Err(IpamError::InvalidContainment(format!(
                "{new_prefix} overlaps {}",
                sibling.prefix
            )));
        } else {
            remaining.push(sibling.prefix);
        }
    }
    remaining.push(new_prefix);

    let mut subnet = Subnet::child(draft, parent, upper_subnet.root);
    subnet.offline_utilization = utilization(new_prefix, &reparented);
    let parent_utilization = utilization(parent, &remaining);

    Ok(PlacementPlan {
        subnet,
        reparented,
        parent_utilization,
    })
}

/// The sibling that strictly contains `prefix`, if any.
fn closer_ancestor(siblings: &[Subnet], prefix: Ipv4) -> Option<Ipv4> {
    siblings
        .iter()
        .map(|s| s.prefix)
        .find(|candidate| prefix.strict_subnet_of(candidate))
}
