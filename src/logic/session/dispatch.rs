//! Message Dispatcher
//!
//! Routes one decoded inbound frame to exactly one handler. Frames are
//! dispatched sequentially, in arrival order, by the session read loop.
//!
//! Failure taxonomy:
//! - unknown discriminant: logged + telemetry, session keeps running
//! - compile pipeline failure: negative `rule.compile.result` + telemetry
//!   error event, session keeps running
//! - write failure while replying: transport error, bubbled to the session
//!   for teardown

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::connection::{SharedWriter, TransportError};
use super::protocol::{InboundMessage, OutboundMessage};
use crate::logic::compiler;
use crate::logic::telemetry::{Severity, TelemetryClient};

pub struct Dispatcher {
    telemetry: Arc<TelemetryClient>,
    rules_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(telemetry: Arc<TelemetryClient>, rules_dir: PathBuf) -> Self {
        Self {
            telemetry,
            rules_dir,
        }
    }

    /// Handle one inbound command. An `Err` is a transport failure on the
    /// reply path and tears the connection down; everything else is absorbed
    /// here.
    pub async fn dispatch(
        &self,
        message: InboundMessage,
        writer: &SharedWriter,
    ) -> Result<(), TransportError> {
        match message {
            InboundMessage::Registered { id } => {
                log::info!("agent registered id={}", id);
                // attribution only: the wire identity never changes
                self.telemetry.set_agent_id(&id);
                self.telemetry.emit(
                    "agent.registered",
                    Severity::Info,
                    "agent registration acknowledged",
                    &[("agent_id", &id)],
                );
                Ok(())
            }
            InboundMessage::RulePush { id, payload } => {
                self.handle_rule_push(&id, &payload, writer).await
            }
            InboundMessage::Unknown { kind } => {
                log::warn!("unknown message type: {}", kind);
                self.telemetry.emit(
                    "agent.message.unknown",
                    Severity::Warning,
                    "unknown message type",
                    &[("type", &kind)],
                );
                Ok(())
            }
        }
    }

    async fn handle_rule_push(
        &self,
        id: &str,
        payload: &str,
        writer: &SharedWriter,
    ) -> Result<(), TransportError> {
        log::info!("received rule.push id={}", id);
        self.telemetry.emit(
            "policy.rule.push",
            Severity::Info,
            "received rule push command",
            &[("rule_id", id)],
        );

        let outcome = run_compile(id, payload, &self.rules_dir);

        // Protocol reply and telemetry are independent emissions: the event
        // is recorded even when the reply path is already dead.
        let reply = writer
            .send_json(&OutboundMessage::CompileResult {
                id: id.to_string(),
                success: outcome.success,
                diagnostics: outcome.diagnostics.clone(),
            })
            .await;

        match &outcome.failure {
            None => {
                self.telemetry.emit(
                    "policy.rule.compile",
                    Severity::Info,
                    "rule compile succeeded",
                    &[("rule_id", id)],
                );
            }
            Some(failure) => {
                self.telemetry.emit(
                    "policy.rule.compile",
                    Severity::Error,
                    &failure.message,
                    &[("rule_id", id), ("error", &failure.error)],
                );
            }
        }

        if outcome.simulated_finding {
            // PLACEHOLDER: stand-in for a real detection engine. A keyword
            // scan of the rule text is not scan output and must not be read
            // as such.
            self.telemetry.emit(
                "scan.finding",
                Severity::Warning,
                "simulated finding event",
                &[("rule_id", id)],
            );
        }

        reply
    }
}

/// Result of one compile pipeline run
#[derive(Debug, Clone)]
pub(crate) struct CompileOutcome {
    pub success: bool,
    pub diagnostics: String,
    pub failure: Option<CompileFailure>,
    pub simulated_finding: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CompileFailure {
    /// Telemetry message for this failure stage
    pub message: String,
    /// Underlying error detail
    pub error: String,
}

impl CompileOutcome {
    fn failure(diagnostics: String, stage_message: &str, error: String) -> Self {
        Self {
            success: false,
            diagnostics,
            failure: Some(CompileFailure {
                message: stage_message.to_string(),
                error,
            }),
            simulated_finding: false,
        }
    }
}

/// The compile pipeline: decode, persist, compile. Each stage short-circuits
/// to a negative outcome; nothing here can fail the session.
pub(crate) fn run_compile(id: &str, payload: &str, rules_dir: &Path) -> CompileOutcome {
    let data = match BASE64.decode(payload) {
        Ok(data) => data,
        Err(e) => {
            return CompileOutcome::failure(
                format!("base64 decode error: {}", e),
                "rule payload decode failed",
                e.to_string(),
            );
        }
    };

    let rule_text = String::from_utf8_lossy(&data).to_string();

    // idempotent overwrite, one file per rule id
    let filename = rules_dir.join(format!("{}.yar", id));
    if let Err(e) = fs::write(&filename, &data) {
        return CompileOutcome::failure(
            format!("write file error: {}", e),
            "rule write failed",
            e.to_string(),
        );
    }

    match compiler::compile_rule(&rule_text) {
        Ok(diagnostics) => CompileOutcome {
            success: true,
            diagnostics,
            failure: None,
            // PLACEHOLDER heuristic, not a detection engine
            simulated_finding: rule_text.to_lowercase().contains("matches"),
        },
        Err(e) => CompileOutcome::failure(
            format!("compile error: {}", e),
            "rule compile failed",
            e.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base64_short_circuits_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_compile("r2", "!!notbase64!!", dir.path());

        assert!(!outcome.success);
        assert!(outcome.diagnostics.contains("base64 decode error"));
        // no file was written
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_valid_rule_compiles_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let payload = BASE64.encode("rule test { condition: true }");
        let outcome = run_compile("r1", &payload, dir.path());

        assert!(outcome.success);
        assert_eq!(outcome.diagnostics, "stub: compiled OK");
        assert!(outcome.failure.is_none());
        assert!(!outcome.simulated_finding);

        let written = fs::read_to_string(dir.path().join("r1.yar")).unwrap();
        assert_eq!(written, "rule test { condition: true }");
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let payload = BASE64.encode("rule test { condition: true }");
        assert!(run_compile("r1", &payload, dir.path()).success);
        assert!(run_compile("r1", &payload, dir.path()).success);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_semantically_invalid_rule_fails_compile() {
        let dir = tempfile::tempdir().unwrap();
        let payload = BASE64.encode("condition: true");
        let outcome = run_compile("r3", &payload, dir.path());

        assert!(!outcome.success);
        assert!(outcome.diagnostics.contains("compile error"));
        // the raw text is still persisted for inspection
        assert!(dir.path().join("r3.yar").exists());
    }

    #[test]
    fn test_write_failure_produces_negative_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let payload = BASE64.encode("rule test { condition: true }");
        let outcome = run_compile("r4", &payload, &missing);

        assert!(!outcome.success);
        assert!(outcome.diagnostics.contains("write file error"));
    }

    #[test]
    fn test_matches_keyword_flags_simulated_finding() {
        let dir = tempfile::tempdir().unwrap();
        let payload = BASE64.encode("rule test { condition: true } // Matches payload");
        let outcome = run_compile("r5", &payload, dir.path());

        assert!(outcome.success);
        assert!(outcome.simulated_finding);
    }
}
