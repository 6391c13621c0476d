//! Telemetry Event Types
//!
//! Immutable, timestamped operational events. An event is owned by the
//! telemetry queue from enqueue until it is delivered or dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

/// One id per agent run, for correlating events from the same process
static SESSION_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().to_string());

pub fn session_id() -> &'static str {
    &SESSION_ID
}

/// Event severity, serialized lowercase on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One operational event mirrored to the telemetry sink
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// Unique event id
    pub id: String,
    /// Process-run correlation id
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub agent_id: String,
    pub host: String,
    pub env: String,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, String>,
}

impl TelemetryEvent {
    /// Serialize to a single JSON line for the push envelope
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
