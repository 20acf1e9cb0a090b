//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Interface preferred when deriving the client id
const PREFERRED_INTERFACE: &str = "eth0";

/// Where Linux exposes network interfaces and their hardware addresses
const SYS_CLASS_NET: &str = "/sys/class/net";

/// Identity of this device on the management session
///
/// Doubles as the MQTT client id and as the external id operations are
/// addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a new client ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a client id from `(interface, mac)` pairs: `<os>-<mac without colons>`
    ///
    /// `eth0` wins when present; otherwise the first interface in name order
    /// with a usable hardware address. Loopback and all-zero addresses are skipped.
    pub fn derive(os: &str, interfaces: &[(String, String)]) -> Option<Self> {
        let usable = |(name, mac): &&(String, String)| {
            name != "lo" && !mac.is_empty() && mac.chars().any(|c| c.is_ascii_hexdigit() && c != '0')
        };

        let mut sorted: Vec<&(String, String)> = interfaces.iter().filter(usable).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let (_, mac) = sorted
            .iter()
            .find(|(name, _)| name == PREFERRED_INTERFACE)
            .or_else(|| sorted.first())?;

        let compact: String = mac
            .chars()
            .filter(|c| *c != ':')
            .collect::<String>()
            .to_lowercase();
        Some(Self(format!("{}-{}", os, compact)))
    }

    /// Derive the client id from the host's network interfaces
    pub fn detect() -> Option<Self> {
        let interfaces = read_interfaces(Path::new(SYS_CLASS_NET));
        Self::derive(std::env::consts::OS, &interfaces)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Read `(name, mac)` pairs from a sysfs-style directory
fn read_interfaces(root: &Path) -> Vec<(String, String)> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot list network interfaces in {:?}: {}", root, e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let mac = std::fs::read_to_string(entry.path().join("address")).ok()?;
            Some((name, mac.trim().to_string()))
        })
        .collect()
}
