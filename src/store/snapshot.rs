//! JSON snapshot file of the whole store.

use crate::error::IpamError;
use crate::models::{Router, Subnet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized form of the store.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub routers: Vec<Router>,
}

/// Read a snapshot file, or an empty snapshot if the file doesn't exist.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, IpamError> {
    if !path.exists() {
        log::warn!("Snapshot file not found, starting empty: {}", path.display());
        return Ok(Snapshot::default());
    }

    let json = std::fs::read_to_string(path)
        .map_err(|e| IpamError::Store(format!("reading {}: {e}", path.display())))?;
    log::info!("Reading from snapshot file: {}", path.display());

    let mut deserializer = serde_json::Deserializer::from_str(&json);
    let snapshot: Snapshot = serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        IpamError::Store(format!(
            "parsing {}: path={} error={}",
            path.display(),
            e.path(),
            e.inner()
        ))
    })?;

    log::info!(
        "Loaded {} subnets and {} routers",
        snapshot.subnets.len(),
        snapshot.routers.len()
    );
    Ok(snapshot)
}

/// Write a snapshot through a temporary file so readers never see a partial file.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), IpamError> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| IpamError::Store(format!("serializing snapshot: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| IpamError::Store(format!("writing {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| IpamError::Store(format!("replacing {}: {e}", path.display())))?;

    log::debug!("Wrote snapshot file: {}", path.display());
    Ok(())
}
