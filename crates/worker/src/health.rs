//! Local capacity tracking and the controller health protocol.
//!
//! Two modes, selected by whether a controller URL is configured:
//! - *Standalone*: a local counter only, `available_peers` always empty.
//! - *Controller-connected*: periodically reports load and queries peers
//!   over HTTP.
//!
//! Grounded on the teacher's `webhook.rs` reqwest-client and
//! fire-and-forget delivery pattern; the session counter is passed
//! explicitly into handler construction rather than read from ambient
//! global state (spec's own Design Note on global state).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::warn;

use ttsfleet_wire::{PeerHealth, WorkerReport};

pub struct HealthAgent {
    counter: AtomicI64,
    max_sessions: usize,
    advertise_url: String,
    controller: Option<ControllerLink>,
}

struct ControllerLink {
    base_url: String,
    client: reqwest::Client,
}

impl HealthAgent {
    pub fn new(max_sessions: usize, advertise_url: String, controller_url: Option<String>) -> Self {
        let controller = controller_url.map(|base_url| ControllerLink {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds"),
        });

        Self {
            counter: AtomicI64::new(0),
            max_sessions,
            advertise_url,
            controller,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.controller.is_none()
    }

    pub fn local_sessions(&self) -> usize {
        self.counter.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn can_accept_local(&self) -> bool {
        self.local_sessions() < self.max_sessions
    }

    /// Called exactly once when a LocalSessionHandler is admitted.
    pub fn add_session(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Called exactly once when a LocalSessionHandler terminates,
    /// including when model-open itself failed after admission counted
    /// it (scoped decrement-on-exit).
    pub fn remove_session(&self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }

    /// Ranked peers (most slack first), excluding this worker's own
    /// `advertise_url`. Empty in standalone mode or on any transient HTTP
    /// failure — those are logged, never surfaced to the caller.
    pub async fn available_peers(&self) -> Vec<WorkerReport> {
        let Some(link) = &self.controller else {
            return Vec::new();
        };

        let url = format!("{}/health/available_servers", link.base_url);
        match link.client.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<PeerHealth>>().await {
                Ok(peers) => peers
                    .into_iter()
                    .map(|p| p.server_health)
                    .filter(|s| s.url != self.advertise_url)
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "failed to parse available_servers response");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to query available_servers");
                Vec::new()
            }
        }
    }

    /// Fire-and-forget: posts the current report without the caller
    /// awaiting network I/O inline. Never called for its own sake from a
    /// session-counter mutation; only from the periodic reporter loop.
    pub async fn report_once(&self) {
        let Some(link) = &self.controller else {
            return;
        };

        let report = WorkerReport {
            url: self.advertise_url.clone(),
            sessions: self.local_sessions() as u32,
            max_sessions: self.max_sessions as u32,
        };

        let url = format!("{}/health/report", link.base_url);
        if let Err(e) = link.client.post(&url).json(&report).send().await {
            warn!(error = %e, "failed to report health to controller");
        }
    }

    /// Runs the periodic reporter until `shutdown` fires. Spawn this as
    /// its own task from `main`; it never blocks session admission.
    pub async fn run_reporter(
        self: std::sync::Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        if self.is_standalone() {
            return;
        }
        let mut tick = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.report_once().await;
                }
                _ = shutdown.recv() => {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_has_no_peers_path() {
        let agent = HealthAgent::new(2, "http://w1".to_string(), None);
        assert!(agent.is_standalone());
    }

    #[test]
    fn admission_counter_tracks_capacity() {
        let agent = HealthAgent::new(1, "http://w1".to_string(), None);
        assert!(agent.can_accept_local());
        agent.add_session();
        assert!(!agent.can_accept_local());
        agent.remove_session();
        assert!(agent.can_accept_local());
    }

    #[tokio::test]
    async fn standalone_available_peers_is_empty() {
        let agent = HealthAgent::new(1, "http://w1".to_string(), None);
        assert!(agent.available_peers().await.is_empty());
    }
}
