//! Heartbeat Scheduler
//!
//! One ticker per live connection, lifetime-bound to it. Each tick collects
//! the host snapshot and sends one heartbeat through the shared write path.
//! A send failure is not retried here: the ticker cancels the shared token,
//! which hands teardown to the reconnect state machine, and exits. Teardown
//! in the other direction (read failure) cancels the same token; either way
//! the session joins this task before discarding the connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::SharedWriter;
use super::protocol::{Capabilities, Heartbeat, OutboundMessage};
use crate::logic::snapshot;
use crate::logic::telemetry::{Severity, TelemetryClient};

/// Everything a ticker needs to assemble heartbeats for one connection
#[derive(Debug, Clone)]
pub struct HeartbeatContext {
    pub agent_id: String,
    pub tenant_id: String,
    pub instance_id: String,
    pub containerized: bool,
    pub period: Duration,
}

pub async fn run(
    ctx: HeartbeatContext,
    writer: Arc<SharedWriter>,
    telemetry: Arc<TelemetryClient>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + ctx.period, ctx.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let message = build_heartbeat(&ctx, telemetry.is_enabled());
                if let Err(e) = writer.send_json(&message).await {
                    log::warn!("heartbeat send failed: {}", e);
                    cancel.cancel();
                    return;
                }
                telemetry.emit("agent.heartbeat.sent", Severity::Info, "heartbeat sent", &[]);
            }
        }
    }
}

/// Assemble one heartbeat from fresh snapshots
pub(crate) fn build_heartbeat(ctx: &HeartbeatContext, telemetry_enabled: bool) -> OutboundMessage {
    let sbom = snapshot::collect_sbom_snapshot();
    let cves = snapshot::collect_cve_snapshot();
    let findings_count = cves.len();
    let asset_profile = snapshot::collect_asset_profile(
        &ctx.agent_id,
        &ctx.instance_id,
        ctx.containerized,
        &cves,
    );

    OutboundMessage::Heartbeat(Heartbeat {
        agent_id: ctx.agent_id.clone(),
        tenant_id: ctx.tenant_id.clone(),
        ephemeral: ctx.containerized,
        instance_id: ctx.instance_id.clone(),
        asset_profile,
        sbom,
        cves,
        findings_count,
        capabilities: Capabilities {
            yara_compile: true,
            transport: "websocket",
            telemetry: telemetry_enabled,
            containerized: ctx.containerized,
            runtime: if ctx.containerized { "container" } else { "host" },
            instance_id: ctx.instance_id.clone(),
        },
    })
}
