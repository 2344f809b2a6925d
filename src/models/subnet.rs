//! Subnet record stored in the hierarchy.

use super::Ipv4;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of the most recent live scan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    #[default]
    Unknown,
    Active,
    Inactive,
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnlineStatus::Unknown => "unknown",
            OnlineStatus::Active => "active",
            OnlineStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// What a caller supplies when declaring a subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetDraft {
    pub prefix: Ipv4,
    pub name: String,
    pub label: String,
}

impl SubnetDraft {
    pub fn new(prefix: Ipv4) -> Self {
        SubnetDraft {
            prefix,
            name: String::new(),
            label: String::new(),
        }
    }

    pub fn named(prefix: Ipv4, name: &str, label: &str) -> Self {
        SubnetDraft {
            prefix,
            name: name.trim().to_string(),
            label: label.trim().to_string(),
        }
    }
}

/// A subnet in the hierarchy, keyed by its canonical prefix.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subnet {
    pub prefix: Ipv4,
    /// Top-most ancestor; equal to `prefix` for a root.
    pub root: Ipv4,
    /// Immediate containing subnet, `None` for roots.
    #[serde(default)]
    pub parent: Option<Ipv4>,
    #[serde(default)]
    pub name: String,
    /// Free-text descriptive field. Older snapshots call it `description` or `service`.
    #[serde(default, alias = "description", alias = "service")]
    pub label: String,
    #[serde(default)]
    pub offline_utilization: f64,
    #[serde(default)]
    pub online_status: OnlineStatus,
    #[serde(default)]
    pub online_utilization: Option<f64>,
    #[serde(default)]
    pub last_scanned: Option<DateTime<Utc>>,
}

impl Subnet {
    /// A new root subnet.
    pub fn root(draft: SubnetDraft) -> Self {
        Subnet {
            prefix: draft.prefix,
            root: draft.prefix,
            parent: None,
            name: draft.name,
            label: draft.label,
            offline_utilization: 0.0,
            online_status: OnlineStatus::Unknown,
            online_utilization: None,
            last_scanned: None,
        }
    }

    /// A new subnet placed under `parent` in the tree rooted at `root`.
    pub fn child(draft: SubnetDraft, parent: Ipv4, root: Ipv4) -> Self {
        Subnet {
            parent: Some(parent),
            root,
            ..Subnet::root(draft)
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Partial update of a stored subnet. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetFields {
    pub parent: Option<Ipv4>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub offline_utilization: Option<f64>,
    pub online_status: Option<OnlineStatus>,
    pub online_utilization: Option<f64>,
    pub last_scanned: Option<DateTime<Utc>>,
}

impl SubnetFields {
    pub fn reparent(parent: Ipv4) -> Self {
        SubnetFields {
            parent: Some(parent),
            ..Default::default()
        }
    }

    pub fn offline_utilization(value: f64) -> Self {
        SubnetFields {
            offline_utilization: Some(value),
            ..Default::default()
        }
    }

    pub fn apply_to(self, subnet: &mut Subnet) {
        if let Some(parent) = self.parent {
            subnet.parent = Some(parent);
        }
        if let Some(name) = self.name {
            subnet.name = name;
        }
        if let Some(label) = self.label {
            subnet.label = label;
        }
        if let Some(value) = self.offline_utilization {
            subnet.offline_utilization = value;
        }
        if let Some(status) = self.online_status {
            subnet.online_status = status;
        }
        if let Some(value) = self.online_utilization {
            subnet.online_utilization = Some(value);
        }
        if let Some(at) = self.last_scanned {
            subnet.last_scanned = Some(at);
        }
    }
}
