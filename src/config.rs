//! Runtime settings read from the environment (and `.env`).

use crate::error::IpamError;
use crate::device::DEFAULT_SCAN_CONCURRENCY;
use crate::hierarchy::DEFAULT_MAX_SUBDIVIDE_CHILDREN;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const STORE_FILE_KEY: &str = "IPAM_STORE_FILE";
pub const LABEL_NAME_KEY: &str = "IPAM_LABEL_NAME";
pub const PROBE_TIMEOUT_KEY: &str = "IPAM_PROBE_TIMEOUT_SECS";
pub const PROBE_CMD_KEY: &str = "IPAM_PROBE_CMD";
pub const MAX_SUBDIVIDE_KEY: &str = "IPAM_MAX_SUBDIVIDE";
pub const SCAN_CONCURRENCY_KEY: &str = "IPAM_SCAN_CONCURRENCY";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// JSON snapshot file backing the store.
    pub store_file: PathBuf,
    /// Column header used for the descriptive `label` field.
    pub label_name: String,
    /// Upper bound on one router attempt (connectivity test plus route query).
    pub probe_timeout: Duration,
    /// External driver command template, see [`crate::device::CommandProbe`].
    pub probe_command: Option<String>,
    pub max_subdivide_children: u64,
    /// Subnets scanned at the same time by one `reconcile_many` call.
    pub scan_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            store_file: PathBuf::from("ipam_store.json"),
            label_name: "description".to_string(),
            probe_timeout: Duration::from_secs(30),
            probe_command: None,
            max_subdivide_children: DEFAULT_MAX_SUBDIVIDE_CHILDREN,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }
}

impl Settings {
    /// Settings from the process environment. Call `dotenv::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self, IpamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IpamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut settings = Settings::default();

        if let Some(file) = get(STORE_FILE_KEY) {
            settings.store_file = PathBuf::from(file);
        }
        if let Some(name) = get(LABEL_NAME_KEY) {
            settings.label_name = name;
        }
        if let Some(secs) = get(PROBE_TIMEOUT_KEY) {
            let secs: u64 = parse_number(PROBE_TIMEOUT_KEY, &secs)?;
            if secs == 0 {
                return Err(IpamError::Config(format!("{PROBE_TIMEOUT_KEY} must be at least 1")));
            }
            settings.probe_timeout = Duration::from_secs(secs);
        }
        settings.probe_command = get(PROBE_CMD_KEY);
        if let Some(max) = get(MAX_SUBDIVIDE_KEY) {
            settings.max_subdivide_children = parse_number(MAX_SUBDIVIDE_KEY, &max)?;
        }
        if let Some(n) = get(SCAN_CONCURRENCY_KEY) {
            let n: usize = parse_number(SCAN_CONCURRENCY_KEY, &n)?;
            if n == 0 {
                return Err(IpamError::Config(format!("{SCAN_CONCURRENCY_KEY} must be at least 1")));
            }
            settings.scan_concurrency = n;
        }

        log::debug!("Settings: {settings:?}");
        Ok(settings)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, IpamError> {
    value
        .parse()
        .map_err(|_| IpamError::Config(format!("{key}='{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, IpamError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.probe_timeout, Duration::from_secs(30));
        assert_eq!(settings.label_name, "description");
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            (STORE_FILE_KEY, "/var/lib/ipam/store.json"),
            (LABEL_NAME_KEY, "service"),
            (PROBE_TIMEOUT_KEY, " 5 "),
            (PROBE_CMD_KEY, "napalm-cli {driver} {host} {user} '{command}'"),
            (MAX_SUBDIVIDE_KEY, "256"),
            (SCAN_CONCURRENCY_KEY, "1"),
        ])
        .unwrap();
        assert_eq!(settings.store_file, PathBuf::from("/var/lib/ipam/store.json"));
        assert_eq!(settings.label_name, "service");
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
        assert!(settings.probe_command.is_some());
        assert_eq!(settings.max_subdivide_children, 256);
        assert_eq!(settings.scan_concurrency, 1);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let settings = settings_from(&[(LABEL_NAME_KEY, "  "), (PROBE_CMD_KEY, "")]).unwrap();
        assert_eq!(settings.label_name, "description");
        assert_eq!(settings.probe_command, None);
    }

    #[test]
    fn test_invalid_numbers() {
        let err = settings_from(&[(PROBE_TIMEOUT_KEY, "soon")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = settings_from(&[(PROBE_TIMEOUT_KEY, "0")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = settings_from(&[(MAX_SUBDIVIDE_KEY, "-1")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = settings_from(&[(SCAN_CONCURRENCY_KEY, "0")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
