//! SBOM Snapshot
//!
//! Package inventory assembled from whichever OS package databases exist on
//! this host (apk, dpkg, rpm), plus operator-provided extras. Deduplicated
//! and sorted so consecutive snapshots compare stably.

use std::collections::HashSet;
use std::fs;
use std::process::Command;

use serde::Serialize;

use crate::constants;
use crate::logic::config::env_or_default;

/// One installed package
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Deduplicating package accumulator
struct PackageSet {
    packages: Vec<Package>,
    seen: HashSet<String>,
}

impl PackageSet {
    fn new() -> Self {
        Self {
            packages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn add(&mut self, name: &str, version: &str, kind: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let version = match version.trim() {
            "" => "unknown",
            v => v,
        };
        let kind = match kind.trim() {
            "" => "package",
            k => k,
        };
        let key = format!(
            "{}|{}|{}",
            name.to_lowercase(),
            version.to_lowercase(),
            kind.to_lowercase()
        );
        if !self.seen.insert(key) {
            return;
        }
        self.packages.push(Package {
            name: name.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        });
    }

    fn into_sorted(mut self) -> Vec<Package> {
        self.packages.sort_by(|a, b| {
            let na = a.name.to_lowercase();
            let nb = b.name.to_lowercase();
            na.cmp(&nb)
                .then_with(|| a.version.to_lowercase().cmp(&b.version.to_lowercase()))
        });
        self.packages
    }
}

/// Collect the SBOM snapshot for one heartbeat
pub fn collect_sbom_snapshot() -> Vec<Package> {
    let mut set = PackageSet::new();

    set.add(
        env!("CARGO_PKG_NAME"),
        &env_or_default("AGENT_VERSION", constants::APP_VERSION),
        "application",
    );

    // Alpine packages.
    if let Ok(content) = fs::read_to_string("/lib/apk/db/installed") {
        parse_apk_db(&content, &mut set);
    }

    // Debian/Ubuntu packages.
    if let Ok(content) = fs::read_to_string("/var/lib/dpkg/status") {
        parse_dpkg_status(&content, &mut set);
    }

    // RPM packages. A spawn failure just means rpm isn't installed here.
    if let Ok(output) = Command::new("rpm")
        .args(["-qa", "--qf", "%{NAME}\t%{VERSION}-%{RELEASE}\n"])
        .output()
    {
        if output.status.success() {
            parse_rpm_listing(&String::from_utf8_lossy(&output.stdout), &mut set);
        }
    }

    // Operator-provided extras: "name:version,name2,..."
    let raw = env_or_default("SBOM_PACKAGES", "");
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once(':') {
            Some((name, version)) => set.add(name, version, "package"),
            None => set.add(part, "unknown", "package"),
        }
    }

    set.into_sorted()
}

/// apk database: blank-line separated records with P:/V: lines
fn parse_apk_db(content: &str, set: &mut PackageSet) {
    let mut name = "";
    let mut version = "";
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("P:") {
            name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("V:") {
            version = rest.trim();
        } else if line.is_empty() {
            if !name.is_empty() {
                set.add(name, version, "apk");
            }
            name = "";
            version = "";
        }
    }
    if !name.is_empty() {
        set.add(name, version, "apk");
    }
}

/// dpkg status file: blank-line separated records with Package:/Version: lines
fn parse_dpkg_status(content: &str, set: &mut PackageSet) {
    let mut name = "";
    let mut version = "";
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Package:") {
            name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("Version:") {
            version = rest.trim();
        } else if line.is_empty() {
            if !name.is_empty() {
                set.add(name, version, "dpkg");
            }
            name = "";
            version = "";
        }
    }
    if !name.is_empty() {
        set.add(name, version, "dpkg");
    }
}

/// rpm -qa output: one "name\tversion-release" per line
fn parse_rpm_listing(content: &str, set: &mut PackageSet) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, version)) = line.split_once('\t') {
            set.add(name, version, "rpm");
        }
    }
}
