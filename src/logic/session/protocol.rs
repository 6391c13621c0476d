//! Wire Protocol
//!
//! JSON frame types exchanged with the controller. Inbound frames are routed
//! by the `type` discriminant; unknown discriminants are preserved so the
//! dispatcher can report them. Outbound frames are constructed, serialized,
//! and sent — never stored.

use serde::{Deserialize, Serialize};

use crate::logic::snapshot::{AssetProfile, Cve, Package};

/// Raw inbound frame shape. Only the discriminant is mandatory.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    payload: String,
}

/// One decoded inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Controller assigned/confirmed a server-side identity
    Registered { id: String },
    /// Rule text for local compilation, transport-encoded
    RulePush { id: String, payload: String },
    /// Anything else: logged and reported, never fatal
    Unknown { kind: String },
}

/// Decode one inbound text frame.
///
/// A decode failure here means the stream framing can no longer be trusted;
/// the caller treats it as connection-fatal.
pub fn decode_frame(text: &str) -> Result<InboundMessage, serde_json::Error> {
    let frame: RawFrame = serde_json::from_str(text)?;
    Ok(match frame.kind.as_str() {
        "agent.registered" => InboundMessage::Registered { id: frame.id },
        "rule.push" => InboundMessage::RulePush {
            id: frame.id,
            payload: frame.payload,
        },
        _ => InboundMessage::Unknown { kind: frame.kind },
    })
}

/// One outbound frame, tagged with its wire discriminant
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "hello")]
    Hello { token: String, agent_id: String },
    #[serde(rename = "agent.heartbeat")]
    Heartbeat(Heartbeat),
    #[serde(rename = "rule.compile.result")]
    CompileResult {
        id: String,
        success: bool,
        diagnostics: String,
    },
}

/// Periodic self-report: identity, capabilities, and the inventory snapshot
#[derive(Debug, Serialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub tenant_id: String,
    pub ephemeral: bool,
    pub instance_id: String,
    pub asset_profile: AssetProfile,
    pub sbom: Vec<Package>,
    pub cves: Vec<Cve>,
    pub findings_count: usize,
    pub capabilities: Capabilities,
}

/// Fixed and derived capability flags advertised in each heartbeat
#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub yara_compile: bool,
    pub transport: &'static str,
    pub telemetry: bool,
    pub containerized: bool,
    pub runtime: &'static str,
    pub instance_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rule_push() {
        let msg = decode_frame(r#"{"type":"rule.push","id":"r1","payload":"cnVsZQ=="}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::RulePush {
                id: "r1".to_string(),
                payload: "cnVsZQ==".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_registered() {
        let msg = decode_frame(r#"{"type":"agent.registered","id":"srv-9"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Registered {
                id: "srv-9".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let msg = decode_frame(r#"{"type":"controller.ping"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Unknown {
                kind: "controller.ping".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"id":"missing-type"}"#).is_err());
    }

    #[test]
    fn test_hello_serialization() {
        let hello = OutboundMessage::Hello {
            token: "tok".to_string(),
            agent_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&hello).unwrap();
        assert!(json.contains("\"type\":\"hello\""));
        assert!(json.contains("\"agent_id\":\"abc\""));
    }

    #[test]
    fn test_compile_result_serialization() {
        let result = OutboundMessage::CompileResult {
            id: "r1".to_string(),
            success: false,
            diagnostics: "base64 decode error: bad input".to_string(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"type\":\"rule.compile.result\""));
        assert!(json.contains("\"success\":false"));
    }
}
