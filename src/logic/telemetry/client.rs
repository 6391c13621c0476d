//! Telemetry Client
//!
//! Bounded, non-blocking event buffer drained by a dedicated worker that
//! ships events to the remote log sink (Loki push protocol, one call per
//! event).
//!
//! Overflow policy: `emit` never blocks the caller. When the queue is full
//! the newest event is dropped and a local diagnostic is logged. Delivery
//! failures are logged and the event is discarded — there is no retry and no
//! redelivery.
//!
//! The drain worker lives for the whole process, independent of the
//! controller connection state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::event::{Severity, TelemetryEvent};
use crate::constants;
use crate::logic::config::TelemetryConfig;

/// Producer half: shared by the session, dispatcher, and compile pipeline
pub struct TelemetryClient {
    enabled: bool,
    tenant_id: String,
    env: String,
    host: String,
    /// Attribution id: seeded with the wire identity, overridden only by the
    /// controller's registration ack. Read-mostly, rare-write.
    agent_id: RwLock<String>,
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

/// Consumer half: drains the queue strictly in enqueue order
pub struct TelemetryWorker {
    rx: mpsc::Receiver<TelemetryEvent>,
    push_url: String,
    http: reqwest::Client,
}

impl TelemetryClient {
    /// Create the client/worker pair. The caller spawns `worker.run()` once
    /// when telemetry is enabled; it is never restarted.
    pub fn new(config: &TelemetryConfig, wire_agent_id: &str) -> (Arc<Self>, TelemetryWorker) {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown-host".to_string());

        let (tx, rx) = mpsc::channel(constants::TELEMETRY_QUEUE_CAPACITY);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(constants::TELEMETRY_PUSH_TIMEOUT))
            .build()
            .expect("Failed to create HTTP client");

        let client = Arc::new(Self {
            enabled: config.enabled,
            tenant_id: config.tenant_id.clone(),
            env: config.env.clone(),
            host,
            agent_id: RwLock::new(wire_agent_id.to_string()),
            tx,
            dropped: AtomicU64::new(0),
        });

        let worker = TelemetryWorker {
            rx,
            push_url: config.push_url.clone(),
            http,
        };

        (client, worker)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Override the attribution id after a registration ack.
    /// Safe to call concurrently with `emit` from the heartbeat ticker.
    pub fn set_agent_id(&self, agent_id: &str) {
        *self.agent_id.write() = agent_id.to_string();
    }

    fn current_agent_id(&self) -> String {
        let guard = self.agent_id.read();
        if guard.is_empty() {
            "unassigned".to_string()
        } else {
            guard.clone()
        }
    }

    /// Enqueue one event. Never blocks; drops the event when the queue is
    /// full or the worker is gone.
    pub fn emit(&self, event_type: &str, severity: Severity, message: &str, fields: &[(&str, &str)]) {
        if !self.enabled {
            return;
        }

        let event = TelemetryEvent {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: super::event::session_id().to_string(),
            timestamp: Utc::now(),
            tenant_id: self.tenant_id.clone(),
            agent_id: self.current_agent_id(),
            host: self.host.clone(),
            env: self.env.clone(),
            event_type: event_type.to_string(),
            severity,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "telemetry queue full, dropping event type={} (dropped={})",
                    ev.event_type,
                    dropped
                );
            }
            Err(TrySendError::Closed(ev)) => {
                log::debug!("telemetry worker gone, dropping event type={}", ev.event_type);
            }
        }
    }

    /// Total events dropped on overflow since startup
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// Loki push envelope: one stream, one [unix_nanos, json_line] value per call.

#[derive(Serialize)]
struct LokiPushRequest {
    streams: Vec<LokiStream>,
}

#[derive(Serialize)]
struct LokiStream {
    stream: HashMap<String, String>,
    values: Vec<(String, String)>,
}

impl TelemetryWorker {
    /// Process-lifetime drain loop. Exits only when every producer handle
    /// has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.push(&event).await {
                log::warn!("telemetry push failed: {}", e);
            }
        }
    }

    async fn push(&self, event: &TelemetryEvent) -> Result<(), PushError> {
        let line = event.to_line();

        let mut labels = HashMap::new();
        labels.insert(
            "service".to_string(),
            constants::TELEMETRY_SERVICE_LABEL.to_string(),
        );
        labels.insert("tenant_id".to_string(), event.tenant_id.clone());
        labels.insert("agent_id".to_string(), event.agent_id.clone());
        labels.insert("event_type".to_string(), event.event_type.clone());
        labels.insert("severity".to_string(), event.severity.as_str().to_string());
        labels.insert("env".to_string(), event.env.clone());

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let payload = LokiPushRequest {
            streams: vec![LokiStream {
                stream: labels,
                values: vec![(nanos.to_string(), line)],
            }],
        };

        let response = self
            .http
            .post(&self.push_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn drain_pending(&mut self) -> Vec<TelemetryEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Telemetry delivery errors. Always logged and swallowed by the worker.
#[derive(Debug, Clone)]
enum PushError {
    Network(String),
    Status(u16),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "network error: {}", e),
            Self::Status(code) => write!(f, "unexpected status code: {}", code),
        }
    }
}
