//! Connection Target & Shared Write Path
//!
//! The connection target is derived once from configuration and identity and
//! never changes across reconnects. The shared writer is the single outbound
//! serialization point for one live connection: the heartbeat ticker and the
//! dispatcher both write through it, so frames never interleave. Every write
//! carries a bounded deadline; a timeout is a transport error like any other.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;

/// Immutable dial target with identity-bearing query parameters
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub url: Url,
}

impl ConnectionTarget {
    pub fn build(
        endpoint: &str,
        agent_id: &str,
        instance_id: &str,
        containerized: bool,
    ) -> Result<Self, TargetError> {
        let mut url =
            Url::parse(endpoint).map_err(|e| TargetError::InvalidEndpoint(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("agent_id", agent_id);
            if containerized {
                query.append_pair("ephemeral", "1");
                query.append_pair("runtime", "container");
            }
            query.append_pair("instance_id", instance_id);
        }
        Ok(Self { url })
    }
}

/// Dial the controller. `insecure_tls` accepts self-signed certificates on
/// wss:// endpoints (internal deployments terminate TLS themselves).
pub async fn connect(
    target: &ConnectionTarget,
    insecure_tls: bool,
) -> Result<WsStream, TransportError> {
    let connector = if target.url.scheme() == "wss" && insecure_tls {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (stream, _response) =
        connect_async_tls_with_config(target.url.as_str(), None, false, connector)
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;
    Ok(stream)
}

/// Single outbound serialization point for one live connection
pub struct SharedWriter {
    sink: Mutex<WsSink>,
    write_timeout: Duration,
}

impl SharedWriter {
    pub fn new(sink: WsSink, write_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            write_timeout,
        }
    }

    /// Serialize and send one frame under the write deadline.
    pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Write(e.to_string())),
            Err(_) => Err(TransportError::WriteTimeout),
        }
    }
}

/// Transport-level failures. All of them are connection-fatal and absorbed
/// by the reconnect state machine; none propagate to the process.
#[derive(Debug, Clone)]
pub enum TransportError {
    Dial(String),
    Write(String),
    WriteTimeout,
    Encode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dial(e) => write!(f, "dial error: {}", e),
            Self::Write(e) => write!(f, "write error: {}", e),
            Self::WriteTimeout => write!(f, "write deadline exceeded"),
            Self::Encode(e) => write!(f, "encode error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Startup-only configuration failures. The one class of error that may
/// terminate the process.
#[derive(Debug, Clone)]
pub enum TargetError {
    InvalidEndpoint(String),
    UnsupportedScheme(String),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEndpoint(e) => write!(f, "invalid endpoint: {}", e),
            Self::UnsupportedScheme(s) => write!(f, "unsupported scheme: {}", s),
        }
    }
}

impl std::error::Error for TargetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_carries_identity_query() {
        let target =
            ConnectionTarget::build("ws://host:8002/agent/ws", "abc", "inst-1", false).unwrap();
        let query = target.url.query().unwrap();
        assert!(query.contains("agent_id=abc"));
        assert!(query.contains("instance_id=inst-1"));
        assert!(!query.contains("ephemeral"));
    }

    #[test]
    fn test_containerized_target_is_marked_ephemeral() {
        let target =
            ConnectionTarget::build("wss://host/agent/ws", "abc", "pod-7", true).unwrap();
        let query = target.url.query().unwrap();
        assert!(query.contains("ephemeral=1"));
        assert!(query.contains("runtime=container"));
    }

    #[test]
    fn test_existing_query_parameters_survive() {
        let target =
            ConnectionTarget::build("ws://host/ws?org=acme", "abc", "i", false).unwrap();
        let query = target.url.query().unwrap();
        assert!(query.contains("org=acme"));
        assert!(query.contains("agent_id=abc"));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(ConnectionTarget::build("://nope", "abc", "i", false).is_err());
        assert!(ConnectionTarget::build("http://host/ws", "abc", "i", false).is_err());
    }
}
