//! Background health probing
//!
//! Each round probes every non-disabled worker concurrently and writes the
//! outcome back into the registry. A failed probe only demotes its own worker.

use crate::registry::{Registry, WorkerPatch};
use crate::worker_client::WorkerTransport;
use chrono::Utc;
use futures::future::join_all;
use infrazero_common::error::InfraZeroError;
use infrazero_common::METRICS;
use infrazero_proto::WorkerRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Probe every non-disabled worker in `snapshot` once
///
/// Returns one patch per probed worker, in snapshot order. The registry is not
/// touched, so a round can be tested with a fake transport.
pub async fn probe_round(
    snapshot: &[WorkerRecord],
    transport: &dyn WorkerTransport,
    path: &str,
    timeout: Duration,
) -> Vec<(String, WorkerPatch)> {
    let probes = snapshot.iter().filter(|r| !r.disabled).map(|record| async move {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, transport.probe(&record.endpoint, path)).await {
            Ok(Ok(_health)) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(InfraZeroError::timeout(format!(
                "health probe exceeded {:?}",
                timeout
            ))),
        };

        let patch = match outcome {
            Ok(elapsed) => {
                METRICS.prober.probes_total.with_label_values(&["healthy"]).inc();
                WorkerPatch::healthy(elapsed.as_secs_f64() * 1000.0, Some(Utc::now()))
            }
            Err(e) => {
                METRICS.prober.probes_total.with_label_values(&["down"]).inc();
                debug!("Probe of {} at {} failed: {}", record.id, record.endpoint, e);
                WorkerPatch::down(Some(Utc::now()))
            }
        };
        (record.id.clone(), patch)
    });

    join_all(probes).await
}

/// Periodic prober writing into a [`Registry`]
pub struct HealthProber {
    registry: Registry,
    transport: Arc<dyn WorkerTransport>,
    interval: Duration,
    timeout: Duration,
    health_path: String,
}

impl HealthProber {
    pub fn new(
        registry: Registry,
        transport: Arc<dyn WorkerTransport>,
        interval: Duration,
        timeout: Duration,
        health_path: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            interval,
            timeout,
            health_path: health_path.into(),
        }
    }

    /// Run a single round against the current registry contents
    pub async fn run_once(&self) -> usize {
        let snapshot = self.registry.list_all();
        let patches = probe_round(&snapshot, self.transport.as_ref(), &self.health_path, self.timeout).await;
        let probed = patches.len();

        for (id, patch) in patches {
            self.registry.update(&id, patch);
        }

        METRICS.prober.rounds_total.inc();
        debug!("Probe round finished: {} of {} workers probed", probed, snapshot.len());
        probed
    }

    /// Probe until `cancel` fires; the interval is measured from the end of each round
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Health prober started: interval={:?}, timeout={:?}",
            self.interval, self.timeout
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_once() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Health prober stopped");
    }

    /// Start background probing
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
