//! Stable per-machine identity of a capture agent

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

static MACHINE_ID: OnceLock<String> = OnceLock::new();

/// Identity derived from the host name and the user name, cached for the
/// lifetime of the process
pub fn machine_id() -> &'static str {
    MACHINE_ID.get_or_init(|| derive_machine_id(&hostname(), &username()))
}

/// Lowercase hex SHA-256 of `hostname` followed by `username`
pub fn derive_machine_id(hostname: &str, username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(username.as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// Host name, from the first lookup that yields one. An empty result means
/// every lookup failed; agents on such hosts should set `machine_id`
/// explicitly, since they all hash to the same id otherwise.
fn hostname() -> String {
    let lookups: [fn() -> Option<String>; 5] = [
        || env_value("COMPUTERNAME"),
        || read_trimmed("/proc/sys/kernel/hostname"),
        || read_trimmed("/etc/hostname"),
        || env_value("HOSTNAME"),
        hostname_command,
    ];

    match lookups.iter().find_map(|lookup| lookup()) {
        Some(name) => name,
        None => {
            tracing::warn!("Could not determine the host name; set machine_id in the agent config");
            String::new()
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// `hostname` is available on Linux, macOS and Windows alike
fn hostname_command() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string()).filter(|h| !h.is_empty())
}

fn username() -> String {
    ["USERNAME", "USER"]
        .iter()
        .find_map(|key| env_value(key))
        .unwrap_or_default()
}
