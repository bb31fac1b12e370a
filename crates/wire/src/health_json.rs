//! JSON shapes for the controller's health HTTP API.
//!
//! `health.proto` fixes the schema field names (the original source
//! carries health reports as protobuf too); the HTTP surface exchanges
//! them as plain JSON rather than protobuf-JSON, so these are
//! hand-written `serde` structs whose field names mirror the `.proto`
//! message, not a `prost`-generated type.

use serde::{Deserialize, Serialize};

/// Mirrors `ttsfleet.health.ServerHealth`. Posted by a worker to
/// `/health/report`; returned (wrapped in [`PeerHealth`]) by the
/// controller's query endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerReport {
    pub url: String,
    pub sessions: u32,
    pub max_sessions: u32,
}

impl WorkerReport {
    /// `max_sessions - sessions`, clamped to `>= 0` for ranking.
    pub fn slack(&self) -> u32 {
        self.max_sessions.saturating_sub(self.sessions)
    }
}

/// Mirrors `ttsfleet.health.GetServerHealthResponse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerHealth {
    pub server_health: WorkerReport,
    pub last_updated: f64,
}
