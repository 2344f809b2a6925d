//! Error taxonomy for the subnet engine.
//!
//! Every error carries a stable [`ErrorKind`] and a human-readable detail.
//! Details never include credentials.

use crate::models::Ipv4;
use std::fmt;

/// Stable error kind reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    InvalidContainment,
    HasChildren,
    NotFound,
    Connectivity,
    Probe,
    Integrity,
    Store,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::InvalidContainment => "InvalidContainment",
            ErrorKind::HasChildren => "HasChildren",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Connectivity => "ConnectivityError",
            ErrorKind::Probe => "ProbeError",
            ErrorKind::Integrity => "IntegrityError",
            ErrorKind::Store => "StoreError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IpamError {
    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("invalid prefix length '{0}', expected 0 to 32")]
    InvalidPrefixLength(String),

    #[error("unknown router vendor '{0}'")]
    InvalidVendor(String),

    /// Usernames are substituted into the driver command line.
    #[error("invalid router username '{0}', it can't be empty or contain spaces or quotes")]
    InvalidUsername(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidContainment(String),

    /// The subnet still has children and can't be deleted or subdivided.
    #[error("subnet {0} contains smaller subnet(s)")]
    HasChildren(Ipv4),

    #[error("{0} not found")]
    NotFound(String),

    #[error("can't connect to routers: {0}")]
    Connectivity(String),

    #[error("unreadable device output: {0}")]
    Probe(String),

    #[error("hierarchy integrity violation: {0}")]
    Integrity(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IpamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IpamError::InvalidAddress(_)
            | IpamError::InvalidPrefixLength(_)
            | IpamError::InvalidVendor(_)
            | IpamError::InvalidUsername(_) => ErrorKind::Validation,
            IpamError::Conflict(_) => ErrorKind::Conflict,
            IpamError::InvalidContainment(_) => ErrorKind::InvalidContainment,
            IpamError::HasChildren(_) => ErrorKind::HasChildren,
            IpamError::NotFound(_) => ErrorKind::NotFound,
            IpamError::Connectivity(_) => ErrorKind::Connectivity,
            IpamError::Probe(_) => ErrorKind::Probe,
            IpamError::Integrity(_) => ErrorKind::Integrity,
            IpamError::Store(_) => ErrorKind::Store,
            IpamError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn subnet_not_found(prefix: Ipv4) -> Self {
        IpamError::NotFound(format!("subnet {prefix}"))
    }
}
