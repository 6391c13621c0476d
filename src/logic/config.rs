//! Agent Configuration
//!
//! Environment-driven configuration with defaults from `constants`.
//! Everything is resolved once at startup; the resulting structs are
//! immutable for the process lifetime.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

/// Read an environment variable, falling back when unset or blank
pub fn env_or_default(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Read a boolean environment variable ("1", "true", "yes", "on")
pub fn env_bool(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        }
        _ => fallback,
    }
}

/// Read a seconds-valued environment variable as a `Duration`
pub fn env_secs(key: &str, fallback: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(fallback);
    Duration::from_secs(secs)
}

/// Identity bootstrap configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Explicit agent id override (skips the persisted file entirely)
    pub override_id: Option<String>,
    /// Where the generated agent id is persisted across restarts
    pub id_file: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let override_id = std::env::var("AGENT_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let id_file = std::env::var("AGENT_ID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("hostguard")
                    .join("agent_id")
            });

        Self { override_id, id_file }
    }
}

/// Telemetry sink configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub push_url: String,
    pub tenant_id: String,
    pub env: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("TELEMETRY_ENABLED", false),
            push_url: env_or_default("TELEMETRY_PUSH_URL", constants::DEFAULT_TELEMETRY_PUSH_URL),
            tenant_id: constants::get_tenant_id(),
            env: constants::get_deploy_env(),
        }
    }
}

/// Controller session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Controller WebSocket endpoint
    pub endpoint: String,
    /// Optional enrollment token carried in the hello message
    pub enroll_token: String,
    pub tenant_id: String,
    pub heartbeat_interval: Duration,
    /// Fixed delay before retrying after a failed attempt
    pub reconnect_backoff: Duration,
    pub read_idle_timeout: Duration,
    pub write_timeout: Duration,
    /// Working directory for persisted rule text
    pub rules_dir: PathBuf,
    /// Accept self-signed certificates on wss:// endpoints.
    /// Internal deployments terminate TLS with self-signed certs by default.
    pub insecure_tls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: constants::get_ws_url(),
            enroll_token: constants::get_enroll_token(),
            tenant_id: constants::get_tenant_id(),
            heartbeat_interval: env_secs(
                "AGENT_HEARTBEAT_INTERVAL",
                constants::DEFAULT_HEARTBEAT_INTERVAL,
            ),
            reconnect_backoff: env_secs(
                "AGENT_RECONNECT_BACKOFF",
                constants::DEFAULT_RECONNECT_BACKOFF,
            ),
            read_idle_timeout: env_secs(
                "AGENT_READ_TIMEOUT",
                constants::DEFAULT_READ_IDLE_TIMEOUT,
            ),
            write_timeout: env_secs("AGENT_WRITE_TIMEOUT", constants::DEFAULT_WRITE_TIMEOUT),
            rules_dir: std::env::var("AGENT_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("hostguard_rules")),
            insecure_tls: env_bool("AGENT_INSECURE_TLS", true),
        }
    }
}

/// Full agent configuration, resolved once in `main`
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub telemetry: TelemetryConfig,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}
