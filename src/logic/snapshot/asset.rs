//! Asset Profile Collection
//!
//! Builds the per-heartbeat asset profile: OS and hardware facts, network
//! identity, logged-in user, and a posture summary derived from the current
//! CVE snapshot. Most fields can be pinned by the operator through
//! environment overrides; detection is the fallback.

use std::fs;
use std::net::UdpSocket;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Networks, System};

use super::cve::Cve;
use crate::logic::config::env_or_default;

/// Full asset profile embedded in each heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct AssetProfile {
    pub asset_id: String,
    pub asset_name: String,
    pub provider: String,
    pub cloud_region: String,
    pub account_id: String,
    pub asset_category: String,
    pub instance_id: String,
    pub runtime_kind: String,
    pub os: OsInfo,
    pub hardware: HardwareInfo,
    pub network: NetworkInfo,
    pub identity: UserIdentity,
    pub asset_groups: Vec<String>,
    pub posture: PostureInfo,
    pub last_scanned: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub kernel: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareInfo {
    pub cpu_cores: usize,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub primary_ip: String,
    pub mac_address: String,
    pub dns_servers: Vec<String>,
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserIdentity {
    pub username: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostureInfo {
    pub compliance_status: String,
    pub patch_level: String,
    pub hardening_profile: String,
    pub risk_score: i64,
    pub identity_risk: String,
    pub network_exposure: String,
    pub last_scan_at: DateTime<Utc>,
}

/// Collect the asset profile for one heartbeat
pub fn collect_asset_profile(
    agent_id: &str,
    instance_id: &str,
    containerized: bool,
    cve_snapshot: &[Cve],
) -> AssetProfile {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();

    let (username, domain) = resolve_user_identity();

    let mut sys = System::new();
    sys.refresh_all();

    let resolv = fs::read_to_string("/etc/resolv.conf").unwrap_or_default();
    let (resolv_domain, dns_servers) = parse_resolv_conf(&resolv);

    let domain = if domain == "unknown" {
        domain_from_host(&host)
            .or(resolv_domain)
            .unwrap_or_else(|| "unknown".to_string())
    } else {
        domain
    };

    let (mac_address, interfaces) = collect_interfaces();

    let runtime_kind = if containerized { "container" } else { "host" };
    let now = Utc::now();

    AssetProfile {
        asset_id: env_or_default("ASSET_ID", agent_id),
        asset_name: env_or_default("ASSET_NAME", &host),
        provider: env_or_default("CLOUD_PROVIDER", "unknown"),
        cloud_region: env_or_default("CLOUD_REGION", "unknown"),
        account_id: env_or_default("CLOUD_ACCOUNT_ID", "unknown"),
        asset_category: env_or_default("ASSET_CATEGORY", "host"),
        instance_id: instance_id.to_string(),
        runtime_kind: runtime_kind.to_string(),
        os: OsInfo {
            name: env_or_default("OS_NAME", &System::name().unwrap_or_default()),
            version: env_or_default("OS_VERSION", &System::os_version().unwrap_or_default()),
            kernel: env_or_default("OS_KERNEL", &System::kernel_version().unwrap_or_default()),
            architecture: std::env::consts::ARCH.to_string(),
        },
        hardware: HardwareInfo {
            cpu_cores: sys.cpus().len(),
            memory_mb: sys.total_memory() / (1024 * 1024),
        },
        network: NetworkInfo {
            primary_ip: env_or_default("PRIMARY_IP", &detect_primary_ipv4()),
            mac_address: env_or_default("PRIMARY_MAC", &mac_address),
            dns_servers,
            interfaces,
        },
        identity: UserIdentity { username, domain },
        asset_groups: parse_asset_groups(&env_or_default("ASSET_GROUPS", "")),
        posture: PostureInfo {
            compliance_status: if cve_snapshot.is_empty() {
                "Compliant".to_string()
            } else {
                "Needs Review".to_string()
            },
            patch_level: env_or_default("PATCH_LEVEL", "Unknown"),
            hardening_profile: env_or_default("HARDENING_PROFILE", "Baseline"),
            risk_score: risk_score(cve_snapshot),
            identity_risk: env_or_default("IDENTITY_RISK", "Low"),
            network_exposure: env_or_default("NETWORK_EXPOSURE", "Medium"),
            last_scan_at: now,
        },
        last_scanned: now,
    }
}

/// Weighted severity sum over the CVE snapshot
pub(crate) fn risk_score(cves: &[Cve]) -> i64 {
    let mut score = 0;
    for cve in cves {
        score += match cve.severity.trim().to_lowercase().as_str() {
            "critical" => 10,
            "high" => 6,
            "medium" => 3,
            "low" => 1,
            _ => 0,
        };
    }
    score
}

/// Current user plus a DOMAIN\user or user@domain split when present
fn resolve_user_identity() -> (String, String) {
    let current = env_or_default("USER", &env_or_default("USERNAME", "unknown"));

    if let Some((domain, user)) = current.split_once('\\') {
        let domain = domain.trim();
        let user = user.trim();
        if !domain.is_empty() && !user.is_empty() {
            return (user.to_string(), domain.to_string());
        }
    }
    if let Some((user, domain)) = current.split_once('@') {
        let user = user.trim();
        let domain = domain.trim();
        if !user.is_empty() && !domain.is_empty() {
            return (user.to_string(), domain.to_string());
        }
    }
    (current, "unknown".to_string())
}

/// Everything after the first dot of a fully-qualified hostname
pub(crate) fn domain_from_host(host: &str) -> Option<String> {
    let host = host.trim();
    match host.split_once('.') {
        Some((_, rest)) if !rest.trim().is_empty() => Some(rest.trim().to_string()),
        _ => None,
    }
}

/// Extract the search/domain entry and nameservers from resolv.conf content
pub(crate) fn parse_resolv_conf(content: &str) -> (Option<String>, Vec<String>) {
    let mut domain = None;
    let mut servers = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("nameserver"), Some(addr)) => servers.push(addr.to_string()),
            (Some("search"), Some(value)) | (Some("domain"), Some(value)) => {
                if domain.is_none() && value != "." {
                    domain = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    (domain, servers)
}

/// Routing-table-free primary IPv4 detection: a connected UDP socket exposes
/// the local address the kernel would route outbound traffic through,
/// without sending any packets.
fn detect_primary_ipv4() -> String {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };
    if socket.connect("8.8.8.8:80").is_err() {
        return String::new();
    }
    socket
        .local_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default()
}

/// First non-loopback MAC plus the full interface inventory
fn collect_interfaces() -> (String, Vec<InterfaceInfo>) {
    let networks = Networks::new_with_refreshed_list();
    let mut primary_mac = String::new();
    let mut interfaces = Vec::new();

    for (name, data) in &networks {
        let mac = data.mac_address().to_string();
        interfaces.push(InterfaceInfo {
            name: name.clone(),
            mac: mac.clone(),
        });
        if primary_mac.is_empty() && name.as_str() != "lo" && mac != "00:00:00:00:00:00" {
            primary_mac = mac;
        }
    }

    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    (primary_mac, interfaces)
}

fn parse_asset_groups(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .map(|g| g.to_string())
        .collect()
}
