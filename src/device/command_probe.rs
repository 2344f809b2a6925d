//! [`DeviceProbe`] that runs an external driver command per query.
//!
//! The command line comes from a template with the placeholders `{driver}`,
//! `{host}`, `{user}` and `{command}`, for example
//! `napalm-cli --driver {driver} {host} {user} '{command}'`. The password is
//! exported to the child as `IPAM_DEVICE_PASSWORD`.

use super::cli::run;
use super::{CancelSignal, DeviceProbe, ProbeError, ProbeTarget};
use crate::config::Settings;
use crate::models::{Ipv4, Vendor};
use regex::Regex;
use std::sync::OnceLock;

pub const PASSWORD_ENV: &str = "IPAM_DEVICE_PASSWORD";

static PREFIX_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_prefix_regex() -> &'static Regex {
    PREFIX_REGEX.get_or_init(|| {
        Regex::new(r"(?:\d{1,3}\.){3}\d{1,3}/\d{1,2}").expect("Invalid Regex")
    })
}

/// Driver name understood by the external command.
pub fn driver_name(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Juniper => "junos",
        Vendor::Cisco => "ios",
        Vendor::Huawei => "huawei_vrp",
    }
}

/// Cheap command used to check that a router answers.
pub fn connectivity_command(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Juniper | Vendor::Cisco => "show version",
        Vendor::Huawei => "display version",
    }
}

/// Vendor CLI command listing routes equal to or inside `prefix`.
pub fn routes_command(vendor: Vendor, prefix: Ipv4) -> String {
    match vendor {
        Vendor::Juniper => format!("show route {prefix} orlonger terse"),
        Vendor::Cisco => format!(
            "show ip route {} {} longer-prefixes",
            prefix.addr(),
            prefix.netmask()
        ),
        Vendor::Huawei => format!(
            "display ip routing-table {} {} longer-match",
            prefix.addr(),
            prefix.mask()
        ),
    }
}

/// Extract the routed prefixes inside `queried` from raw device output,
/// sorted and without duplicates.
pub fn parse_routes(output: &str, queried: Ipv4) -> Result<Vec<Ipv4>, ProbeError> {
    let mut routes = Vec::new();
    for m in get_prefix_regex().find_iter(output) {
        let route = Ipv4::new(m.as_str())
            .map_err(|e| ProbeError::Malformed(format!("'{}': {e}", m.as_str())))?;
        if route.subnet_of(&queried) {
            routes.push(route);
        }
    }
    routes.sort();
    routes.dedup();
    Ok(routes)
}

#[derive(Debug, Clone)]
pub struct CommandProbe {
    template: String,
}

impl CommandProbe {
    pub fn new(template: impl Into<String>) -> Self {
        CommandProbe {
            template: template.into(),
        }
    }

    /// The probe configured by `IPAM_PROBE_CMD`, if any.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings.probe_command.as_deref().map(CommandProbe::new)
    }

    fn render(&self, target: &ProbeTarget, command: &str) -> String {
        self.template
            .replace("{driver}", driver_name(target.vendor))
            .replace("{host}", &target.host.to_string())
            .replace("{user}", &target.username)
            .replace("{command}", command)
    }

    fn exec(
        &self,
        target: &ProbeTarget,
        command: &str,
        cancel: &CancelSignal,
    ) -> Result<String, ProbeError> {
        run(
            &self.render(target, command),
            &[(PASSWORD_ENV, target.password.as_str())],
            cancel,
        )
    }
}

impl DeviceProbe for CommandProbe {
    fn test_connection(&self, target: &ProbeTarget, cancel: &CancelSignal) -> bool {
        match self.exec(target, connectivity_command(target.vendor), cancel) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Router {} failed connection test: {e}", target.host);
                false
            }
        }
    }

    fn query_routes(
        &self,
        target: &ProbeTarget,
        prefix: Ipv4,
        cancel: &CancelSignal,
    ) -> Result<Vec<Ipv4>, ProbeError> {
        let output = self.exec(target, &routes_command(target.vendor, prefix), cancel)?;
        parse_routes(&output, prefix)
    }
}
