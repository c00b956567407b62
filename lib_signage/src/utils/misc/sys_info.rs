use std::fmt;
use std::fs;
use std::path::Path;

use hostname::get;
use local_ip_address::local_ip;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Files that hold a stable per-installation machine identifier, in lookup order.
pub const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Error)]
/// # Host Info Error
///
/// Errors that can occur while collecting host information.
pub enum HostInfoError {
    /// The hostname could not be read.
    #[error("Hostname lookup failed: {0}")]
    Hostname(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// # Host Information
///
/// The host facts that feed the fallback device identity and the startup log line.
pub struct HostInfo {
    /// The process ID of the current process.
    pub process_pid: u32,
    /// The hostname of the machine running the process.
    pub host_name: String,
    /// The local IP address of the machine, empty when it cannot be determined.
    pub host_ip: String,
    /// The operating system family, e.g. `linux`.
    pub os: String,
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostInfo
    Pid: {},
    Host: {},
    Host ip: {},
    OS: {}
",
            self.process_pid, self.host_name, self.host_ip, self.os
        )
    }
}

/// # Get Host Information
///
/// Collects hostname, local IP and OS. A missing IP is tolerated (offline
/// devices still need an identity); a missing hostname is an error.
pub fn get_host_info() -> Result<HostInfo, HostInfoError> {
    let host_name = get()?.to_string_lossy().into_owned();
    let host_ip = match local_ip() {
        Ok(ip) => ip.to_string(),
        Err(_) => String::new(),
    };

    Ok(HostInfo {
        process_pid: std::process::id(),
        host_name,
        host_ip,
        os: std::env::consts::OS.to_string(),
    })
}

/// # Machine Identifier
///
/// Reads the first non-empty identifier from `paths`.
pub fn machine_id_from(paths: &[impl AsRef<Path>]) -> Option<String> {
    paths.iter().find_map(|p| {
        fs::read_to_string(p)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

/// # Composite Device Key
///
/// Derives a stable key from host facts when no machine identifier exists:
/// `dev-` followed by the first 16 hex digits of SHA-256 over hostname and OS.
/// The IP is left out since a new lease or an offline boot changes it.
pub fn composite_device_key(info: &HostInfo) -> String {
    let mut hasher = Sha256::new();
    for part in [&info.host_name, &info.os] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("dev-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(host: &str, ip: &str) -> HostInfo {
        HostInfo {
            process_pid: 1,
            host_name: host.into(),
            host_ip: ip.into(),
            os: "linux".into(),
        }
    }

    #[test]
    fn composite_key_is_stable_and_prefixed() {
        let a = composite_device_key(&info("kiosk", "10.0.0.5"));
        let b = composite_device_key(&info("kiosk", "10.0.0.5"));
        assert_eq!(a, b);
        assert!(a.starts_with("dev-"));
        assert_eq!(a.len(), 20);
        assert_ne!(a, composite_device_key(&info("lobby", "10.0.0.5")));
    }

    #[test]
    fn composite_key_survives_address_changes() {
        let leased = composite_device_key(&info("kiosk", "192.168.1.10"));
        assert_eq!(leased, composite_device_key(&info("kiosk", "192.168.1.23")));
        assert_eq!(leased, composite_device_key(&info("kiosk", "")));
    }

    #[test]
    fn machine_id_skips_blank_files() {
        let dir = tempdir().unwrap();
        let blank = dir.path().join("blank");
        let real = dir.path().join("real");
        fs::write(&blank, "  \n").unwrap();
        fs::write(&real, "abc123\n").unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(machine_id_from(&[missing, blank, real]), Some("abc123".into()));
    }
}
