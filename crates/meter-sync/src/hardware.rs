//! Hardware identifier of the machine running the backup.
//!
//! Resolved once at startup through a fallback chain: the CPU serial from
//! `/proc/cpuinfo` (Raspberry Pi), then the MAC of the first non-loopback
//! network interface as a decimal integer, then the host name.

use std::fmt;
use std::path::Path;

use tracing::debug;

const CPUINFO_PATH: &str = "/proc/cpuinfo";
const NET_CLASS_DIR: &str = "/sys/class/net";

/// An immutable hardware identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HardwareId(String);

impl HardwareId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Detect the identifier of this machine.
    pub fn detect() -> Self {
        let cpuinfo = std::fs::read_to_string(CPUINFO_PATH).ok();
        let host = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self::resolve(cpuinfo.as_deref(), Path::new(NET_CLASS_DIR), host)
    }

    /// Walk the fallback chain over explicit sources.
    pub fn resolve(cpuinfo: Option<&str>, net_dir: &Path, host: Option<String>) -> Self {
        if let Some(serial) = cpuinfo.and_then(serial_from_cpuinfo) {
            debug!("Hardware id from CPU serial");
            return Self(serial);
        }
        if let Some(mac) = first_interface_mac(net_dir).as_deref().and_then(mac_to_decimal) {
            debug!("Hardware id from network interface");
            return Self(mac);
        }
        debug!("Hardware id from host name");
        Self(
            host.filter(|h| !h.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The 16-character serial from a `Serial\t\t: 00000000abcdef01` line.
pub fn serial_from_cpuinfo(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("Serial"))
        .and_then(|line| line.get(10..26))
        .map(str::to_string)
}

/// A colon-separated MAC as a decimal integer string; all-zero MACs are rejected.
pub fn mac_to_decimal(mac: &str) -> Option<String> {
    let hex: String = mac.trim().split(':').collect();
    if hex.len() != 12 {
        return None;
    }
    match u64::from_str_radix(&hex, 16) {
        Ok(0) | Err(_) => None,
        Ok(value) => Some(value.to_string()),
    }
}

fn first_interface_mac(net_dir: &Path) -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir(net_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    names.iter().find_map(|name| {
        let address = std::fs::read_to_string(net_dir.join(name).join("address")).ok()?;
        mac_to_decimal(&address).map(|_| address.trim().to_string())
    })
}
