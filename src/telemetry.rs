//! Read-only telemetry snapshots (§6 "Telemetry (read-only)"). Produced
//! on demand, not sampled in the background — introspection here is a
//! pull model, matching the teacher's `ShowChannel` pull-based `show`
//! commands rather than a push metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct QueueTelemetry {
    pub pending: usize,
    pub markers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerTelemetry {
    pub in_sync: bool,
    pub send_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RibOutTelemetry {
    pub active_peers: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub bulk_queue: Option<QueueTelemetry>,
    pub update_queue: Option<QueueTelemetry>,
    pub peers: Vec<(usize, PeerTelemetry)>,
    pub ribout: Option<RibOutTelemetry>,
}

/// Counters for config-driven impossibilities absorbed per §7 kind 4
/// (e.g. `unregister_peer` for a peer that was never registered).
#[derive(Debug, Default)]
pub struct ContractCounters {
    pub leave_for_non_member: AtomicU64,
    pub join_for_existing_member: AtomicU64,
}

impl ContractCounters {
    pub const fn new() -> Self {
        Self {
            leave_for_non_member: AtomicU64::new(0),
            join_for_existing_member: AtomicU64::new(0),
        }
    }
}

pub static COUNTERS: ContractCounters = ContractCounters::new();
