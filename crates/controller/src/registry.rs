//! In-memory `url -> WorkerReport` mapping with staleness gating and a
//! background expiry sweep.
//!
//! Grounded on `ServiceHealthRepository` in the original controller
//! source; the ranking direction is the *corrected* one per spec.md §9's
//! first Design Note (see DESIGN.md) — `available()` sorts by slack
//! descending, not the original's ascending sort.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;

use ttsfleet_wire::{PeerHealth, WorkerReport};

const DEFAULT_T_STALE: Duration = Duration::from_secs(30);
const DEFAULT_T_EXPIRE: Duration = Duration::from_secs(120);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Entry {
    report: WorkerReport,
    last_updated: Instant,
    // Used only to compute the JSON `last_updated` (seconds since this
    // registry started), independent of the monotonic `Instant` used for
    // staleness math.
    last_updated_epoch_seconds: f64,
}

pub struct CapacityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    started_at: Instant,
    t_stale: Duration,
    t_expire: Duration,
}

impl CapacityRegistry {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_T_STALE, DEFAULT_T_EXPIRE)
    }

    pub fn with_thresholds(t_stale: Duration, t_expire: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            t_stale,
            t_expire,
        }
    }

    pub async fn update(&self, report: WorkerReport) {
        info!(
            url = %report.url,
            sessions = report.sessions,
            max_sessions = report.max_sessions,
            "updating worker health"
        );
        let now = Instant::now();
        let epoch = now.duration_since(self.started_at).as_secs_f64();
        self.entries.write().await.insert(
            report.url.clone(),
            Entry {
                report,
                last_updated: now,
                last_updated_epoch_seconds: epoch,
            },
        );
    }

    /// Entries with slack and whose report is not stale, sorted by slack
    /// descending (tie-break: most recently updated first).
    pub async fn available(&self) -> Vec<PeerHealth> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut results: Vec<_> = entries
            .values()
            .filter(|e| {
                e.report.sessions < e.report.max_sessions
                    && now.duration_since(e.last_updated) <= self.t_stale
            })
            .collect();
        results.sort_by(|a, b| {
            b.report
                .slack()
                .cmp(&a.report.slack())
                .then(b.last_updated.cmp(&a.last_updated))
        });
        results
            .into_iter()
            .map(|e| PeerHealth {
                server_health: e.report.clone(),
                last_updated: e.last_updated_epoch_seconds,
            })
            .collect()
    }

    /// Same ordering as [`Self::available`], without the capacity filter.
    pub async fn all(&self) -> Vec<PeerHealth> {
        let entries = self.entries.read().await;
        let mut results: Vec<_> = entries.values().collect();
        results.sort_by(|a, b| {
            b.report
                .slack()
                .cmp(&a.report.slack())
                .then(b.last_updated.cmp(&a.last_updated))
        });
        results
            .into_iter()
            .map(|e| PeerHealth {
                server_health: e.report.clone(),
                last_updated: e.last_updated_epoch_seconds,
            })
            .collect()
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let t_expire = self.t_expire;
        self.entries
            .write()
            .await
            .retain(|_, e| now.duration_since(e.last_updated) <= t_expire);
    }

    pub async fn run_sweeper(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep_expired().await;
                }
                _ = shutdown.recv() => {
                    return;
                }
            }
        }
    }
}

impl Default for CapacityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(url: &str, sessions: u32, max_sessions: u32) -> WorkerReport {
        WorkerReport {
            url: url.to_string(),
            sessions,
            max_sessions,
        }
    }

    #[tokio::test]
    async fn available_sorts_by_slack_descending() {
        let registry = CapacityRegistry::new();
        registry.update(report("http://full", 2, 2)).await;
        registry.update(report("http://half", 1, 2)).await;
        registry.update(report("http://empty", 0, 2)).await;

        let available = registry.available().await;
        let urls: Vec<_> = available.iter().map(|p| p.server_health.url.clone()).collect();
        assert_eq!(urls, vec!["http://empty", "http://half"]);
    }

    #[tokio::test]
    async fn all_includes_full_workers() {
        let registry = CapacityRegistry::new();
        registry.update(report("http://full", 2, 2)).await;
        let all = registry.all().await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_hidden_from_available_but_kept_in_all() {
        let registry = CapacityRegistry::with_thresholds(Duration::from_millis(10), Duration::from_secs(60));
        registry.update(report("http://w1", 0, 2)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.available().await.is_empty());
        assert_eq!(registry.all().await.len(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries_entirely() {
        let registry = CapacityRegistry::with_thresholds(Duration::from_millis(5), Duration::from_millis(20));
        registry.update(report("http://w1", 0, 2)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        registry.sweep_expired().await;
        assert!(registry.all().await.is_empty());
    }

    #[tokio::test]
    async fn oversubscribed_worker_is_excluded_from_available_but_ranks_last_in_all() {
        let registry = CapacityRegistry::new();
        registry.update(report("http://over", 5, 2)).await;
        registry.update(report("http://under", 0, 2)).await;

        assert_eq!(registry.available().await.len(), 1);
        let all = registry.all().await;
        assert_eq!(all[0].server_health.url, "http://under");
        assert_eq!(all[1].server_health.url, "http://over");
    }
}
