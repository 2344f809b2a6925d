//! Live route queries against network devices.
//!
//! - [`DeviceProbe`] - blocking device access, one call per router attempt
//! - [`CommandProbe`] - probe that shells out to an external driver command
//! - [`Reconciler`] - scans subnets with primary then backup router fallback
//! - [`CancelSignal`] - tells a running probe that its scan was abandoned

mod cli;
mod command_probe;
mod reconcile;

use crate::models::{Ipv4, Vendor};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use command_probe::{
    connectivity_command, driver_name, parse_routes, routes_command, CommandProbe, PASSWORD_ENV,
};
pub use reconcile::{Reconciler, ScanOutcome, DEFAULT_SCAN_CONCURRENCY};

/// Connection details for one router, with the password already unsealed.
#[derive(Clone, PartialEq)]
pub struct ProbeTarget {
    pub vendor: Vendor,
    pub host: Ipv4Addr,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeTarget")
            .field("vendor", &self.vendor)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed output: {0}")]
    Malformed(String),
}

impl ProbeError {
    /// Failures that justify trying the backup router.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProbeError::Unreachable(_) | ProbeError::Timeout(_))
    }
}

/// Raised once nobody waits for a probe attempt any more: the attempt timed
/// out or the scan future was dropped. Long-running probes should poll it and
/// stop their device session.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct CancelOnDrop(CancelSignal);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Blocking access to a router. Implementations are called from tokio's
/// blocking pool and should return soon after `cancel` is raised.
pub trait DeviceProbe: Send + Sync {
    fn test_connection(&self, target: &ProbeTarget, cancel: &CancelSignal) -> bool;

    /// Routed prefixes equal to or more specific than `prefix`.
    fn query_routes(
        &self,
        target: &ProbeTarget,
        prefix: Ipv4,
        cancel: &CancelSignal,
    ) -> Result<Vec<Ipv4>, ProbeError>;
}

/// Run blocking device work on the blocking pool, bounded by `limit`.
///
/// # Arguments
///
/// * `limit` - how long to wait for `work`
/// * `work` - the device session; it receives a [`CancelSignal`] that is raised
///   on timeout or when the returned future is dropped
///
/// # Returns
///
/// The result of `work`, or [`ProbeError::Timeout`] once `limit` has passed.
pub(crate) async fn probe_blocking<T, F>(limit: Duration, work: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce(&CancelSignal) -> Result<T, ProbeError> + Send + 'static,
{
    let signal = CancelSignal::default();
    let _cancel = CancelOnDrop(signal.clone());
    let task = tokio::task::spawn_blocking(move || work(&signal));
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ProbeError::Unreachable(format!("probe task failed: {join_error}"))),
        Err(_) => Err(ProbeError::Timeout(limit)),
    }
}
