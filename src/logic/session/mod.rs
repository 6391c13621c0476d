//! Controller Session - Reconnect State Machine
//!
//! This module handles:
//! - The infinite reconnect loop (`Disconnected → Connecting → Connected`)
//! - The per-connection read loop and heartbeat ticker
//! - Teardown: signal the ticker, join it, drop the transport, back off
//!
//! ## Structure
//! - `connection.rs` - dial target, shared write path, transport errors
//! - `protocol.rs` - inbound/outbound frame types
//! - `dispatch.rs` - inbound routing and the compile pipeline
//! - `heartbeat.rs` - per-connection ticker
//!
//! All reconnect decisions live here. Handlers never retry in place; every
//! failure funnels into one of three places: a protocol reply, a telemetry
//! event, or a state transition in this loop.

pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod protocol;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::logic::config::SessionConfig;
use crate::logic::identity::{self, AgentIdentity};
use crate::logic::snapshot;
use crate::logic::telemetry::{Severity, TelemetryClient};

use connection::{ConnectionTarget, SharedWriter, TargetError, WsStream};
use dispatch::Dispatcher;
use heartbeat::HeartbeatContext;
use protocol::OutboundMessage;

/// Session lifecycle states. There is no terminal state: the agent runs
/// until the process does.
enum SessionState {
    /// `backoff` is set after a failed attempt; the first attempt of the
    /// process connects immediately.
    Disconnected { backoff: bool },
    Connecting,
    Connected(Box<WsStream>),
}

/// Owns the one logical controller session of this process. At most one
/// physical connection is live at a time; a failed connection is destroyed
/// and replaced, never repaired.
pub struct Session {
    config: SessionConfig,
    identity: AgentIdentity,
    instance_id: String,
    containerized: bool,
    target: ConnectionTarget,
    telemetry: Arc<TelemetryClient>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        identity: AgentIdentity,
        telemetry: Arc<TelemetryClient>,
    ) -> Result<Self, TargetError> {
        let containerized = snapshot::running_in_container();
        let instance_id = identity::resolve_instance_id(&identity);
        let target =
            ConnectionTarget::build(&config.endpoint, &identity.id, &instance_id, containerized)?;

        Ok(Self {
            config,
            identity,
            instance_id,
            containerized,
            target,
            telemetry,
        })
    }

    /// Drive the session forever.
    pub async fn run(self) {
        let mut state = SessionState::Disconnected { backoff: false };

        loop {
            state = match state {
                SessionState::Disconnected { backoff } => {
                    if backoff {
                        sleep(self.config.reconnect_backoff).await;
                    }
                    SessionState::Connecting
                }
                SessionState::Connecting => {
                    log::info!("connecting to {}", self.target.url);
                    self.telemetry.emit(
                        "agent.connection.attempt",
                        Severity::Info,
                        "attempting websocket connection",
                        &[("url", self.target.url.as_str())],
                    );
                    match connection::connect(&self.target, self.config.insecure_tls).await {
                        Ok(stream) => SessionState::Connected(Box::new(stream)),
                        Err(e) => {
                            log::warn!("dial error: {}", e);
                            self.telemetry.emit(
                                "agent.connection.error",
                                Severity::Warning,
                                "websocket dial failed",
                                &[("error", &e.to_string())],
                            );
                            SessionState::Disconnected { backoff: true }
                        }
                    }
                }
                SessionState::Connected(stream) => {
                    self.telemetry.emit(
                        "agent.connection.open",
                        Severity::Info,
                        "websocket connected",
                        &[],
                    );
                    self.run_connected(*stream).await;
                    SessionState::Disconnected { backoff: true }
                }
            };
        }
    }

    /// One connected period: exactly one read loop and one heartbeat ticker,
    /// both gone before this returns.
    async fn run_connected(&self, stream: WsStream) {
        let (sink, mut stream) = stream.split();
        let writer = Arc::new(SharedWriter::new(sink, self.config.write_timeout));

        // Best-effort hello: advisory, not part of a required handshake.
        let hello = OutboundMessage::Hello {
            token: self.config.enroll_token.clone(),
            agent_id: self.identity.id.clone(),
        };
        if let Err(e) = writer.send_json(&hello).await {
            log::warn!("hello send failed: {}", e);
        }

        let cancel = CancellationToken::new();
        let heartbeat_task = tokio::spawn(heartbeat::run(
            HeartbeatContext {
                agent_id: self.identity.id.clone(),
                tenant_id: self.config.tenant_id.clone(),
                instance_id: self.instance_id.clone(),
                containerized: self.containerized,
                period: self.config.heartbeat_interval,
            },
            writer.clone(),
            self.telemetry.clone(),
            cancel.clone(),
        ));

        let dispatcher = Dispatcher::new(self.telemetry.clone(), self.config.rules_dir.clone());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::warn!("outbound write path failed, tearing down connection");
                    break;
                }
                next = tokio::time::timeout(self.config.read_idle_timeout, stream.next()) => {
                    match next {
                        Err(_) => {
                            log::warn!("idle deadline exceeded, tearing down connection");
                            break;
                        }
                        Ok(None) => {
                            log::warn!("connection closed");
                            break;
                        }
                        Ok(Some(Err(e))) => {
                            log::warn!("read error: {}", e);
                            break;
                        }
                        Ok(Some(Ok(Message::Text(text)))) => {
                            match protocol::decode_frame(&text) {
                                Ok(inbound) => {
                                    if let Err(e) = dispatcher.dispatch(inbound, &writer).await {
                                        log::warn!("reply write failed: {}", e);
                                        break;
                                    }
                                }
                                Err(e) => {
                                    // framing can no longer be trusted
                                    log::warn!("malformed frame, tearing down connection: {}", e);
                                    break;
                                }
                            }
                        }
                        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {
                            // keepalive, answered by the transport layer
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            log::info!("controller closed the connection");
                            break;
                        }
                        Ok(Some(Ok(_))) => {
                            log::warn!("unexpected non-text frame, tearing down connection");
                            break;
                        }
                    }
                }
            }
        }

        // signal-and-join: the ticker must acknowledge before the transport
        // is dropped, so a stale tick never writes to a dead connection
        cancel.cancel();
        let _ = heartbeat_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use futures_util::SinkExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::WebSocketStream;

    use crate::logic::config::TelemetryConfig;
    use crate::logic::telemetry::TelemetryWorker;

    type ServerWs = WebSocketStream<TcpStream>;

    fn test_config(endpoint: String, rules_dir: &Path) -> SessionConfig {
        SessionConfig {
            endpoint,
            enroll_token: "tok".to_string(),
            tenant_id: "default".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            reconnect_backoff: Duration::from_millis(50),
            read_idle_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            rules_dir: rules_dir.to_path_buf(),
            insecure_tls: false,
        }
    }

    fn test_telemetry(agent_id: &str) -> (Arc<TelemetryClient>, TelemetryWorker) {
        TelemetryClient::new(
            &TelemetryConfig {
                enabled: true,
                push_url: "http://127.0.0.1:9/loki/api/v1/push".to_string(),
                tenant_id: "default".to_string(),
                env: "test".to_string(),
            },
            agent_id,
        )
    }

    async fn accept_capturing_uri(
        listener: &TcpListener,
        captured: Arc<StdMutex<Option<String>>>,
    ) -> ServerWs {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| {
            *captured.lock().unwrap() = Some(req.uri().to_string());
            Ok(resp)
        };
        tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap()
    }

    async fn next_json(ws: &mut ServerWs) -> serde_json::Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("read failed");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Poll the telemetry queue until an event of the given type shows up.
    async fn wait_for_event(
        worker: &mut TelemetryWorker,
        collected: &mut Vec<crate::logic::telemetry::TelemetryEvent>,
        event_type: &str,
    ) {
        for _ in 0..100 {
            collected.extend(worker.drain_pending());
            if collected.iter().any(|e| e.event_type == event_type) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no {} event arrived", event_type);
    }

    #[tokio::test]
    async fn test_full_session_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rules_dir = tempfile::tempdir().unwrap();

        let config = test_config(format!("ws://{}/agent/ws", addr), rules_dir.path());
        let identity = AgentIdentity {
            id: "abc".to_string(),
        };
        let (telemetry, mut worker) = test_telemetry(&identity.id);
        let session = Session::new(config, identity, telemetry).unwrap();
        let session_task = tokio::spawn(session.run());

        // the dial query string carries the wire identity
        let captured = Arc::new(StdMutex::new(None));
        let mut ws = accept_capturing_uri(&listener, captured.clone()).await;
        let uri = captured.lock().unwrap().clone().unwrap();
        assert!(uri.contains("agent_id=abc"));

        // a fresh hello opens every connection
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["agent_id"], "abc");
        assert_eq!(hello["token"], "tok");

        // registration overrides telemetry attribution only
        ws.send(Message::Text(
            r#"{"type":"agent.registered","id":"server-1"}"#.to_string(),
        ))
        .await
        .unwrap();

        // an unknown discriminant is reported but never fatal
        ws.send(Message::Text(r#"{"type":"controller.ping"}"#.to_string()))
            .await
            .unwrap();

        // valid rule push: one positive result, one info compile event
        let payload = BASE64.encode("rule test { condition: true }");
        ws.send(Message::Text(format!(
            r#"{{"type":"rule.push","id":"r1","payload":"{}"}}"#,
            payload
        )))
        .await
        .unwrap();

        let result = next_json(&mut ws).await;
        assert_eq!(result["type"], "rule.compile.result");
        assert_eq!(result["id"], "r1");
        assert_eq!(result["success"], true);

        let mut events = Vec::new();
        wait_for_event(&mut worker, &mut events, "policy.rule.compile").await;
        let compile_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "policy.rule.compile")
            .collect();
        assert_eq!(compile_events.len(), 1);
        assert_eq!(compile_events[0].severity, Severity::Info);
        // attribution was overridden by the registration ack
        assert_eq!(compile_events[0].agent_id, "server-1");
        assert!(events.iter().any(|e| e.event_type == "agent.message.unknown"));

        // invalid base64: negative result, nothing persisted
        ws.send(Message::Text(
            r#"{"type":"rule.push","id":"r2","payload":"!!notbase64!!"}"#.to_string(),
        ))
        .await
        .unwrap();

        let result = next_json(&mut ws).await;
        assert_eq!(result["id"], "r2");
        assert_eq!(result["success"], false);
        assert!(result["diagnostics"]
            .as_str()
            .unwrap()
            .contains("base64 decode error"));
        assert!(rules_dir.path().join("r1.yar").exists());
        assert!(!rules_dir.path().join("r2.yar").exists());

        // kill the transport: the agent reconnects with the same identity
        drop(ws);
        let captured = Arc::new(StdMutex::new(None));
        let mut ws = accept_capturing_uri(&listener, captured.clone()).await;
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["agent_id"], "abc");
        assert!(captured.lock().unwrap().clone().unwrap().contains("agent_id=abc"));

        session_task.abort();
    }

    #[tokio::test]
    async fn test_malformed_frame_triggers_backoff_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rules_dir = tempfile::tempdir().unwrap();

        let config = test_config(format!("ws://{}/agent/ws", addr), rules_dir.path());
        let backoff = config.reconnect_backoff;
        let identity = AgentIdentity {
            id: "abc".to_string(),
        };
        let (telemetry, _worker) = test_telemetry(&identity.id);
        let session = Session::new(config, identity, telemetry).unwrap();
        let session_task = tokio::spawn(session.run());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "hello");

        // a frame that isn't JSON is connection-fatal
        let teardown_started = Instant::now();
        ws.send(Message::Text("this is not a frame".to_string()))
            .await
            .unwrap();

        // the agent comes back after the configured backoff
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["agent_id"], "abc");
        assert!(teardown_started.elapsed() >= backoff);

        session_task.abort();
    }
}
