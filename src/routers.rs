//! Registry of the (at most two) routers used for live scans.

use crate::device::{probe_blocking, DeviceProbe, ProbeTarget};
use crate::error::IpamError;
use crate::models::{Router, Vendor, MAX_ROUTERS};
use crate::processing::validate_address;
use crate::store::TreeStore;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Seals router passwords at rest. Supplied by the deployment.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> Result<String, IpamError>;

    fn decrypt(&self, sealed: &str) -> Result<String, IpamError>;
}

/// A router as entered by an operator, not yet validated.
#[derive(Clone, PartialEq)]
pub struct NewRouter {
    pub ip: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub vendor: String,
}

/// Fields to change on an existing router. `None` keeps the current value.
#[derive(Clone, Default, PartialEq)]
pub struct RouterUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vendor: Option<String>,
}

pub struct RouterRegistry {
    store: Arc<dyn TreeStore>,
    cipher: Arc<dyn SecretCipher>,
    // Serializes read-check-write of the router list.
    write_lock: Mutex<()>,
}

impl RouterRegistry {
    pub fn new(store: Arc<dyn TreeStore>, cipher: Arc<dyn SecretCipher>) -> Self {
        RouterRegistry {
            store,
            cipher,
            write_lock: Mutex::new(()),
        }
    }

    /// Routers in insertion order; the first is the primary.
    pub async fn list(&self) -> Result<Vec<Router>, IpamError> {
        self.store.list_routers().await
    }

    pub async fn get(&self, ip: Ipv4Addr) -> Result<Router, IpamError> {
        self.list()
            .await?
            .into_iter()
            .find(|r| r.ip == ip)
            .ok_or_else(|| router_not_found(ip))
    }

    pub async fn add(&self, input: NewRouter) -> Result<Router, IpamError> {
        let ip = validate_address(&input.ip)?;
        let vendor: Vendor = input.vendor.parse()?;

        let _lock = self.write_lock.lock().await;
        let routers = self.list().await?;
        if routers.iter().any(|r| r.ip == ip) {
            return Err(IpamError::Conflict("Router already exists".to_string()));
        }
        if routers.len() >= MAX_ROUTERS {
            return Err(IpamError::Conflict(
                "Limit exceeded, there are already two Routers.".to_string(),
            ));
        }

        let router = Router {
            ip,
            name: input.name.trim().to_string(),
            username: validate_username(&input.username)?,
            password: self.cipher.encrypt(&input.password)?,
            vendor,
        };
        self.store.insert_router(router.clone()).await?;
        log::info!(
            "Added router {ip} ({vendor}) as {}",
            if routers.is_empty() { "primary" } else { "backup" }
        );
        Ok(router)
    }

    pub async fn update(&self, ip: Ipv4Addr, update: RouterUpdate) -> Result<Router, IpamError> {
        let vendor = update.vendor.as_deref().map(str::parse::<Vendor>).transpose()?;

        let _lock = self.write_lock.lock().await;
        let mut router = self.get(ip).await?;
        if let Some(name) = update.name {
            router.name = name.trim().to_string();
        }
        if let Some(username) = update.username {
            router.username = validate_username(&username)?;
        }
        if let Some(password) = update.password {
            router.password = self.cipher.encrypt(&password)?;
        }
        if let Some(vendor) = vendor {
            router.vendor = vendor;
        }
        self.store.update_router(router.clone()).await?;
        log::info!("Updated router {ip}");
        Ok(router)
    }

    pub async fn delete(&self, ip: Ipv4Addr) -> Result<(), IpamError> {
        let _lock = self.write_lock.lock().await;
        if self.store.delete_router(ip).await? == 0 {
            return Err(router_not_found(ip));
        }
        log::info!("Deleted router {ip}");
        Ok(())
    }

    /// Connection details with the password unsealed.
    pub(crate) fn target_for(&self, router: &Router) -> Result<ProbeTarget, IpamError> {
        Ok(ProbeTarget {
            vendor: router.vendor,
            host: router.ip,
            username: router.username.clone(),
            password: self.cipher.decrypt(&router.password)?,
        })
    }

    /// Whether the router answers within `limit`.
    pub async fn test_connection(
        &self,
        ip: Ipv4Addr,
        probe: Arc<dyn DeviceProbe>,
        limit: Duration,
    ) -> Result<bool, IpamError> {
        let target = self.target_for(&self.get(ip).await?)?;
        let attempt = probe_blocking(limit, move |cancel| {
            Ok(probe.test_connection(&target, cancel))
        });
        let reachable = attempt.await.unwrap_or_else(|e| {
            log::warn!("Connection test for router {ip} failed: {e}");
            false
        });
        log::info!("Router {ip} reachable: {reachable}");
        Ok(reachable)
    }
}

/// Trimmed username that renders as exactly one driver argument.
fn validate_username(raw: &str) -> Result<String, IpamError> {
    let username = raw.trim();
    if username.is_empty()
        || username
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '\'' || c == '"')
    {
        return Err(IpamError::InvalidUsername(raw.to_string()));
    }
    Ok(username.to_string())
}

fn router_not_found(ip: Ipv4Addr) -> IpamError {
    IpamError::NotFound(format!("router {ip}"))
}
