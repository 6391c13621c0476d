//! Agent Identity
//!
//! Durable agent identity management:
//! - Explicit override via `AGENT_ID`
//! - Otherwise read from the persisted identity file
//! - Otherwise generated from secure random bytes and persisted
//!
//! The identity is created once per deployment and is immutable for the
//! process lifetime. The same value is used in the connection target, every
//! heartbeat, and (initially) every telemetry event. The controller may later
//! assign a server-side id for telemetry attribution, but that never touches
//! this wire identity.

use std::fs;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::logic::config::IdentityConfig;

/// Stable agent identity, shared read-only across the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub id: String,
}

/// Load the agent identity, creating and persisting one if necessary.
///
/// Persistence failures are non-fatal: the generated id is still used for
/// this process, it just won't survive a restart.
pub fn load_or_create(config: &IdentityConfig) -> AgentIdentity {
    if let Some(explicit) = &config.override_id {
        log::info!("Using explicit agent_id override");
        return AgentIdentity {
            id: explicit.clone(),
        };
    }

    if let Ok(content) = fs::read_to_string(&config.id_file) {
        let existing = content.trim();
        if !existing.is_empty() {
            return AgentIdentity {
                id: existing.to_string(),
            };
        }
    }

    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let id = hex::encode(bytes);

    if let Some(parent) = config.id_file.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(&config.id_file, format!("{}\n", id)) {
        log::warn!(
            "failed to persist agent id to {:?}: {}",
            config.id_file,
            e
        );
    }

    AgentIdentity { id }
}

/// Resolve the instance id for this run.
///
/// Containerized deployments expose a per-instance `HOSTNAME`; bare hosts
/// fall back to the stable agent id.
pub fn resolve_instance_id(identity: &AgentIdentity) -> String {
    match std::env::var("HOSTNAME") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => identity.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with_file(path: PathBuf) -> IdentityConfig {
        IdentityConfig {
            override_id: None,
            id_file: path,
        }
    }

    #[test]
    fn test_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = IdentityConfig {
            override_id: Some("abc".to_string()),
            id_file: dir.path().join("agent_id"),
        };
        let identity = load_or_create(&config);
        assert_eq!(identity.id, "abc");
        // override never touches the file
        assert!(!config.id_file.exists());
    }

    #[test]
    fn test_generated_id_is_persisted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_file(dir.path().join("agent_id"));

        let first = load_or_create(&config);
        // 16 random bytes, hex encoded
        assert_eq!(first.id.len(), 32);
        assert!(first.id.chars().all(|c| c.is_ascii_hexdigit()));

        // second bootstrap on the same persisted state yields the same id
        let second = load_or_create(&config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_blank_identity_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_file(dir.path().join("agent_id"));
        fs::write(&config.id_file, "  \n").unwrap();

        let identity = load_or_create(&config);
        assert_eq!(identity.id.len(), 32);
    }
}
