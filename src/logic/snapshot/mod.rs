//! Host Snapshot Collectors
//!
//! On-demand, read-only collection of the data embedded in each heartbeat:
//! - `asset.rs` - asset profile (OS, hardware, network, identity, posture)
//! - `sbom.rs` - package inventory from OS package databases
//! - `cve.rs` - vulnerability snapshot (operator-injected inventory)
//!
//! All collectors are pure with respect to process state: they read the
//! filesystem and environment and return plain data.

pub mod asset;
pub mod cve;
pub mod sbom;

pub use asset::{collect_asset_profile, AssetProfile};
pub use cve::{collect_cve_snapshot, Cve};
pub use sbom::{collect_sbom_snapshot, Package};

use crate::logic::config::env_bool;

/// Detect whether the agent runs inside a container / ephemeral workload.
///
/// Checked once at startup; the result feeds the connection target query
/// string and the heartbeat capability descriptor.
pub fn running_in_container() -> bool {
    if env_bool("AGENT_EPHEMERAL", false) {
        return true;
    }
    if std::env::var("KUBERNETES_SERVICE_HOST")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    if std::path::Path::new("/.dockerenv").exists() {
        return true;
    }
    if let Ok(content) = std::fs::read_to_string("/proc/1/cgroup") {
        if cgroup_mentions_container(&content) {
            return true;
        }
    }
    false
}

pub(crate) fn cgroup_mentions_container(content: &str) -> bool {
    let lower = content.to_lowercase();
    ["docker", "containerd", "kubepods", "podman"]
        .iter()
        .any(|needle| lower.contains(needle))
}
