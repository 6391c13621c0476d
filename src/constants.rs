//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change the default controller endpoint, only edit this file.

/// Default controller WebSocket URL
///
/// This is the fallback URL when no environment variable is set.
/// For development: ws://localhost:8002/agent/ws
/// For production: wss://controller.hostguard.io/agent/ws
pub const DEFAULT_WS_URL: &str = "ws://localhost:8002/agent/ws";

/// Default telemetry push endpoint (Loki-compatible)
pub const DEFAULT_TELEMETRY_PUSH_URL: &str = "http://alloy:9999/loki/api/v1/push";

/// Default heartbeat interval (seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;

/// Default reconnect backoff after a failed attempt (seconds)
pub const DEFAULT_RECONNECT_BACKOFF: u64 = 2;

/// Default inbound idle deadline (seconds). A connection that stays silent
/// longer than this is treated as dead and torn down.
pub const DEFAULT_READ_IDLE_TIMEOUT: u64 = 300;

/// Default outbound write deadline (seconds)
pub const DEFAULT_WRITE_TIMEOUT: u64 = 10;

/// Telemetry queue capacity. Overflow drops the newest event.
pub const TELEMETRY_QUEUE_CAPACITY: usize = 200;

/// Timeout for one telemetry push call (seconds)
pub const TELEMETRY_PUSH_TIMEOUT: u64 = 5;

/// Service label attached to every telemetry stream
pub const TELEMETRY_SERVICE_LABEL: &str = "hostguard-agent";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "HostGuard";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get controller WebSocket URL from environment or use default
pub fn get_ws_url() -> String {
    std::env::var("AGENT_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string())
}

/// Get enrollment token from environment (empty when unenrolled)
pub fn get_enroll_token() -> String {
    std::env::var("AGENT_ENROLL_TOKEN").unwrap_or_default()
}

/// Get tenant id from environment or use default
pub fn get_tenant_id() -> String {
    std::env::var("TENANT_ID").unwrap_or_else(|_| "default".to_string())
}

/// Get deployment environment tag from environment or use default
pub fn get_deploy_env() -> String {
    std::env::var("DEPLOY_ENV").unwrap_or_else(|_| "dev".to_string())
}
