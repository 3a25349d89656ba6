//! Fleet polling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use balena_client::FleetApi;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::PollingConfig;
use crate::error::PollError;
use crate::metrics::SharedMetrics;
use crate::snapshot::FleetSnapshot;

/// Poller statistics.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    /// Cycles that updated the registry.
    pub cycles_completed: u64,
    /// Cycles aborted by an error.
    pub cycles_failed: u64,
    /// Device count of the last completed cycle.
    pub last_device_count: usize,
    /// Error of the last failed cycle.
    pub last_error: Option<String>,
}

/// Create a shareable stats handle.
pub type SharedStats = Arc<RwLock<PollerStats>>;

/// Outcome of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub applications: usize,
    pub devices: usize,
    pub duration: Duration,
}

/// Periodically fetches the fleet and refreshes the metrics registry.
pub struct FleetPoller<A> {
    api: A,
    metrics: SharedMetrics,
    interval: Duration,
    exit_on_error: bool,
    stats: SharedStats,
}

impl<A: FleetApi> FleetPoller<A> {
    /// Create a new poller writing into `metrics`.
    pub fn new(api: A, metrics: SharedMetrics, config: &PollingConfig) -> Self {
        Self {
            api,
            metrics,
            interval: Duration::from_secs(config.interval_secs),
            exit_on_error: config.exit_on_error,
            stats: SharedStats::default(),
        }
    }

    /// Handle to the poller statistics.
    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Perform a single fetch, resolve and build cycle.
    pub async fn poll_once(&self) -> Result<CycleSummary, PollError> {
        let started = Instant::now();

        let result = FleetSnapshot::collect(&self.api).await.map(|snapshot| {
            snapshot.apply(&self.metrics);
            CycleSummary {
                applications: snapshot.application_count,
                devices: snapshot.devices.len(),
                duration: started.elapsed(),
            }
        });

        let mut stats = self.stats.write();
        match &result {
            Ok(summary) => {
                stats.cycles_completed += 1;
                stats.last_device_count = summary.devices;
                info!(
                    applications = summary.applications,
                    devices = summary.devices,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Poll cycle completed"
                );
            }
            Err(e) => {
                stats.cycles_failed += 1;
                stats.last_error = Some(e.to_string());
                error!(error = %e, "Poll cycle aborted");
            }
        }

        result
    }

    /// Run cycles until the shutdown signal is received.
    ///
    /// The interval is slept after each cycle finishes. A failed cycle is
    /// skipped until the next interval unless `exit_on_error` is set, in
    /// which case its error is returned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollError> {
        info!(
            interval_secs = self.interval.as_secs(),
            exit_on_error = self.exit_on_error,
            "Starting fleet poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await
                && self.exit_on_error
            {
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Fleet poller stopped");
        Ok(())
    }
}
