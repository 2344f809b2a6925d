//! Live scan of subnets against the primary and backup routers.

use super::{probe_blocking, DeviceProbe, ProbeError};
use crate::config::Settings;
use crate::error::IpamError;
use crate::hierarchy::SubnetTree;
use crate::models::{Ipv4, OnlineStatus, Router, MAX_ROUTERS};
use crate::processing::utilization;
use crate::routers::RouterRegistry;
use futures::stream::{self, StreamExt};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Result of one successful scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub prefix: Ipv4,
    pub status: OnlineStatus,
    pub utilization: f64,
    /// Router that answered.
    pub router: Ipv4Addr,
}

pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

pub struct Reconciler {
    tree: Arc<SubnetTree>,
    routers: Arc<RouterRegistry>,
    probe: Arc<dyn DeviceProbe>,
    timeout: Duration,
    concurrency: usize,
}

impl Reconciler {
    /// `timeout` bounds each router attempt separately.
    pub fn new(
        tree: Arc<SubnetTree>,
        routers: Arc<RouterRegistry>,
        probe: Arc<dyn DeviceProbe>,
        timeout: Duration,
    ) -> Self {
        Reconciler {
            tree,
            routers,
            probe,
            timeout,
            concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }

    /// Reconciler using the configured probe timeout and scan concurrency.
    pub fn from_settings(
        tree: Arc<SubnetTree>,
        routers: Arc<RouterRegistry>,
        probe: Arc<dyn DeviceProbe>,
        settings: &Settings,
    ) -> Self {
        Reconciler::new(tree, routers, probe, settings.probe_timeout)
            .with_concurrency(settings.scan_concurrency)
    }

    /// Cap the scans one [`Reconciler::reconcile_many`] call runs at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Query the routers for `prefix` and store the observed status.
    ///
    /// The backup router is tried only when the primary can't be reached. On
    /// any error the stored record is left as it was.
    pub async fn reconcile(&self, prefix: Ipv4) -> Result<ScanOutcome, IpamError> {
        self.tree.get(prefix).await?;
        let routers = self.routers.list().await?;
        if routers.is_empty() {
            return Err(IpamError::NotFound("configured router".to_string()));
        }

        let mut failures = Vec::new();
        for router in routers.iter().take(MAX_ROUTERS) {
            match self.attempt(router, prefix).await {
                Ok(found) => {
                    let (status, online) = if found.is_empty() {
                        (OnlineStatus::Inactive, 0.0)
                    } else {
                        (OnlineStatus::Active, utilization(prefix, &found))
                    };
                    self.tree.record_scan(prefix, status, online).await?;
                    return Ok(ScanOutcome {
                        prefix,
                        status,
                        utilization: online,
                        router: router.ip,
                    });
                }
                Err(e) if e.is_connectivity() => {
                    log::warn!("Router {} ({}) failed for {prefix}: {e}", router.name, router.ip);
                    failures.push(format!("{} {e}", router.ip));
                }
                Err(e) => {
                    log::warn!("Router {} returned unusable output for {prefix}: {e}", router.ip);
                    return Err(IpamError::Probe(format!("router {}: {e}", router.ip)));
                }
            }
        }
        Err(IpamError::Connectivity(failures.join(", ")))
    }

    /// Scan several subnets, at most `concurrency` at a time.
    ///
    /// # Returns
    ///
    /// One result per prefix, in input order.
    pub async fn reconcile_many(
        &self,
        prefixes: &[Ipv4],
    ) -> Vec<(Ipv4, Result<ScanOutcome, IpamError>)> {
        stream::iter(prefixes.iter().copied())
            .map(|prefix| async move { (prefix, self.reconcile(prefix).await) })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Connectivity test then route query on one router.
    async fn attempt(&self, router: &Router, prefix: Ipv4) -> Result<Vec<Ipv4>, ProbeError> {
        let target = self.routers.target_for(router).map_err(|e| {
            ProbeError::Unreachable(format!("can't unseal credentials ({})", e.kind()))
        })?;
        let probe = self.probe.clone();
        log::debug!("Querying {prefix} on router {}", router.ip);
        probe_blocking(self.timeout, move |cancel| {
            if !probe.test_connection(&target, cancel) {
                return Err(ProbeError::Unreachable("connection test failed".to_string()));
            }
            probe.query_routes(&target, prefix, cancel)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CancelSignal, ProbeTarget};
    use crate::error::ErrorKind;
    use crate::models::SubnetDraft;
    use crate::routers::tests::{new_router, ReverseCipher};
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ip(s: &str) -> Ipv4 {
        Ipv4::new(s).unwrap()
    }

    #[derive(Default)]
    struct FakeProbe {
        down: HashSet<Ipv4Addr>,
        slow: HashSet<Ipv4Addr>,
        garbled: HashSet<Ipv4Addr>,
        routes: Vec<&'static str>,
        pause: Duration,
        queries: AtomicUsize,
        busy: AtomicUsize,
        peak_busy: AtomicUsize,
    }

    impl DeviceProbe for FakeProbe {
        fn test_connection(&self, target: &ProbeTarget, _: &CancelSignal) -> bool {
            if self.slow.contains(&target.host) {
                std::thread::sleep(Duration::from_millis(300));
            }
            !self.down.contains(&target.host)
        }

        fn query_routes(
            &self,
            target: &ProbeTarget,
            prefix: Ipv4,
            _: &CancelSignal,
        ) -> Result<Vec<Ipv4>, ProbeError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_busy.fetch_max(busy, Ordering::SeqCst);
            std::thread::sleep(self.pause);
            self.busy.fetch_sub(1, Ordering::SeqCst);
            if self.garbled.contains(&target.host) {
                return Err(ProbeError::Malformed("10.0.999.0/24".to_string()));
            }
            let output = self.routes.join("\n");
            crate::device::parse_routes(&output, prefix)
        }
    }

    const PRIMARY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const BACKUP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    async fn setup(
        probe: FakeProbe,
        routers: &[&str],
    ) -> (Reconciler, Arc<SubnetTree>, Arc<FakeProbe>) {
        let store = Arc::new(MemoryStore::new());
        let tree = Arc::new(SubnetTree::new(store.clone()));
        tree.add_root(SubnetDraft::new(ip("10.0.0.0/16"))).await.unwrap();
        let registry = Arc::new(RouterRegistry::new(store, Arc::new(ReverseCipher)));
        for router in routers {
            registry.add(new_router(router, "cisco")).await.unwrap();
        }
        let probe = Arc::new(probe);
        let reconciler = Reconciler::new(
            tree.clone(),
            registry,
            probe.clone(),
            Duration::from_millis(100),
        );
        (reconciler, tree, probe)
    }

    #[tokio::test]
    async fn test_primary_answers() {
        let probe = FakeProbe {
            routes: vec!["10.0.0.0/17 via 10.255.0.2", "10.0.0.0/18 via 10.255.0.3"],
            ..Default::default()
        };
        let (reconciler, tree, probe) = setup(probe, &["192.168.1.1", "192.168.1.2"]).await;

        let outcome = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap();
        assert_eq!(outcome.status, OnlineStatus::Active);
        assert_eq!(outcome.utilization, 50.0);
        assert_eq!(outcome.router, PRIMARY);
        assert_eq!(probe.queries.load(Ordering::SeqCst), 1);

        let stored = tree.get(ip("10.0.0.0/16")).await.unwrap();
        assert_eq!(stored.online_status, OnlineStatus::Active);
        assert_eq!(stored.online_utilization, Some(50.0));
        assert!(stored.last_scanned.is_some());
    }

    #[tokio::test]
    async fn test_falls_back_to_backup() {
        let probe = FakeProbe {
            down: HashSet::from([PRIMARY]),
            ..Default::default()
        };
        let (reconciler, tree, _) = setup(probe, &["192.168.1.1", "192.168.1.2"]).await;

        let outcome = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap();
        assert_eq!(outcome.router, BACKUP);
        assert_eq!(outcome.status, OnlineStatus::Inactive);
        assert_eq!(outcome.utilization, 0.0);
        let stored = tree.get(ip("10.0.0.0/16")).await.unwrap();
        assert_eq!(stored.online_utilization, Some(0.0));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let probe = FakeProbe {
            slow: HashSet::from([PRIMARY]),
            routes: vec!["10.0.1.0/24"],
            ..Default::default()
        };
        let (reconciler, _, _) = setup(probe, &["192.168.1.1", "192.168.1.2"]).await;
        let outcome = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap();
        assert_eq!(outcome.router, BACKUP);
        assert_eq!(outcome.utilization, 0.39);
    }

    #[tokio::test]
    async fn test_both_routers_down_leaves_record_untouched() {
        let probe = FakeProbe {
            down: HashSet::from([PRIMARY, BACKUP]),
            ..Default::default()
        };
        let (reconciler, tree, _) = setup(probe, &["192.168.1.1", "192.168.1.2"]).await;
        let before = tree.get(ip("10.0.0.0/16")).await.unwrap();

        let err = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(!err.to_string().contains("hunter2"));
        assert_eq!(tree.get(ip("10.0.0.0/16")).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_malformed_output_does_not_fall_back() {
        let probe = FakeProbe {
            garbled: HashSet::from([PRIMARY]),
            ..Default::default()
        };
        let (reconciler, tree, probe) = setup(probe, &["192.168.1.1", "192.168.1.2"]).await;
        let err = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Probe);
        assert_eq!(probe.queries.load(Ordering::SeqCst), 1);
        assert_eq!(
            tree.get(ip("10.0.0.0/16")).await.unwrap().online_status,
            OnlineStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_no_routers_or_subnet() {
        let (reconciler, _, _) = setup(FakeProbe::default(), &[]).await;
        let err = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = reconciler.reconcile(ip("10.1.0.0/16")).await.unwrap_err();
        assert_eq!(err, IpamError::subnet_not_found(ip("10.1.0.0/16")));
    }

    #[tokio::test]
    async fn test_reconcile_many_reports_each_prefix() {
        let probe = FakeProbe {
            routes: vec!["10.0.2.0/24"],
            ..Default::default()
        };
        let (reconciler, tree, _) = setup(probe, &["192.168.1.1"]).await;
        tree.subdivide(ip("10.0.0.0/16"), 17).await.unwrap();

        let results = reconciler
            .reconcile_many(&[ip("10.0.0.0/17"), ip("10.0.128.0/17"), ip("10.9.0.0/17")])
            .await;
        assert_eq!(results.len(), 3);
        let first = results[0].1.as_ref().unwrap();
        assert_eq!(first.status, OnlineStatus::Active);
        assert_eq!(first.utilization, 0.78);
        assert_eq!(results[1].1.as_ref().unwrap().status, OnlineStatus::Inactive);
        assert_eq!(results[2].1.as_ref().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reconcile_many_limits_concurrent_scans() {
        let probe = FakeProbe {
            routes: vec!["10.0.0.0/24"],
            pause: Duration::from_millis(20),
            ..Default::default()
        };
        let (reconciler, tree, probe) = setup(probe, &["192.168.1.1"]).await;
        let reconciler = reconciler.with_concurrency(2);
        let prefixes: Vec<Ipv4> = tree
            .subdivide(ip("10.0.0.0/16"), 19)
            .await
            .unwrap()
            .iter()
            .map(|s| s.prefix)
            .collect();

        let results = reconciler.reconcile_many(&prefixes).await;
        let scanned: Vec<Ipv4> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(scanned, prefixes);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(probe.queries.load(Ordering::SeqCst), 8);
        assert!(probe.peak_busy.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_from_settings() {
        let settings = Settings {
            probe_timeout: Duration::from_millis(50),
            scan_concurrency: 3,
            ..Settings::default()
        };
        let probe = FakeProbe {
            slow: HashSet::from([PRIMARY]),
            ..Default::default()
        };
        let (reconciler, _, probe) = setup(probe, &["192.168.1.1"]).await;
        let reconciler = Reconciler::from_settings(
            reconciler.tree.clone(),
            reconciler.routers.clone(),
            probe,
            &settings,
        );
        assert_eq!(reconciler.concurrency, 3);

        // 300ms connection test against a 50ms limit.
        let err = reconciler.reconcile(ip("10.0.0.0/16")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.to_string().contains("50ms"), "{err}");
    }
}
