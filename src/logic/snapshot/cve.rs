//! CVE Snapshot
//!
//! Vulnerability inventory for the heartbeat. The agent carries no scanner
//! of its own: the inventory is injected by the operator, either as a JSON
//! document (`MOCK_CVES_JSON`) or as a compact `id:severity:status` list
//! (`MOCK_CVES`). An empty snapshot is the normal case.

use serde::{Deserialize, Serialize};

/// One known vulnerability on this host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cve {
    pub id: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_severity() -> String {
    "unknown".to_string()
}

fn default_status() -> String {
    "open".to_string()
}

/// Collect the CVE snapshot for one heartbeat
pub fn collect_cve_snapshot() -> Vec<Cve> {
    if let Ok(raw) = std::env::var("MOCK_CVES_JSON") {
        let raw = raw.trim();
        if !raw.is_empty() {
            match serde_json::from_str::<Vec<Cve>>(raw) {
                Ok(items) => return items,
                Err(e) => {
                    log::warn!("failed to parse MOCK_CVES_JSON ({}), falling back to MOCK_CVES", e);
                }
            }
        }
    }

    let raw = std::env::var("MOCK_CVES").unwrap_or_default();
    parse_cve_list(&raw)
}

/// Parse the compact `id[:severity[:status]]` comma-separated form
pub(crate) fn parse_cve_list(raw: &str) -> Vec<Cve> {
    let mut items = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut pieces = part.splitn(3, ':');
        let id = pieces.next().unwrap_or_default().trim();
        if id.is_empty() {
            continue;
        }
        let severity = pieces
            .next()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_severity);
        let status = pieces
            .next()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_status);
        items.push(Cve {
            id: id.to_string(),
            severity,
            status,
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_list_parsing() {
        let items = parse_cve_list("CVE-2024-0001:critical:open, CVE-2024-0002:High, CVE-2024-0003");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "CVE-2024-0001");
        assert_eq!(items[0].severity, "critical");
        assert_eq!(items[1].severity, "high");
        assert_eq!(items[2].severity, "unknown");
        assert_eq!(items[2].status, "open");
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_cve_list("").is_empty());
        assert!(parse_cve_list(" , ,, ").is_empty());
    }

    #[test]
    fn test_json_form_round_trips() {
        let json = r#"[{"id":"CVE-2024-1111","severity":"high","status":"open"},{"id":"CVE-2024-2222"}]"#;
        let items: Vec<Cve> = serde_json::from_str(json).unwrap();
        assert_eq!(items[0].severity, "high");
        assert_eq!(items[1].severity, "unknown");
        assert_eq!(items[1].status, "open");
    }
}
