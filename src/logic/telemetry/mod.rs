//! Telemetry Module
//!
//! Best-effort mirroring of agent operational events to a remote log sink.
//! Telemetry is explicitly lossy: it must never apply backpressure to, or
//! fail, the primary protocol path.
//!
//! ## Structure
//! - `event.rs` - TelemetryEvent struct and severity levels
//! - `client.rs` - bounded queue, drain worker, push envelope

pub mod client;
pub mod event;

pub use client::{TelemetryClient, TelemetryWorker};
pub use event::{Severity, TelemetryEvent};
