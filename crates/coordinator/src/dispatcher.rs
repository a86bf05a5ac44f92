//! Inference request routing
//!
//! This module routes inference requests to regional workers, either to the
//! single fastest healthy worker or to every routable worker at once keeping
//! the fastest success. Every call outcome is written back into the registry.

use crate::registry::{Registry, WorkerPatch};
use crate::worker_client::WorkerTransport;
use futures::future::join_all;
use infrazero_common::config::DispatchConfig;
use infrazero_common::error::{InfraZeroError, Result};
use infrazero_common::{DispatchMode, METRICS};
use infrazero_proto::{
    ErrorResponse, FanOutResponse, InferRequest, InferResponse, RegionResult, SingleBestResponse,
    WorkerInferRequest, WorkerRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Soft error returned when no worker is routable
pub const NO_HEALTHY_REGIONS: &str = "no healthy regions";

/// Soft error returned when the single selected worker fails
pub const REGION_UNAVAILABLE: &str = "region unavailable";

/// Successful worker call
#[derive(Debug, Clone, PartialEq)]
struct CallSuccess {
    latency_ms: f64,
    image_url: String,
}

/// Routes inference requests over registry snapshots
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    transport: Arc<dyn WorkerTransport>,
    mode: DispatchMode,
    fan_out_timeout: Duration,
    single_best_timeout: Duration,
    default_steps: u32,
}

impl Dispatcher {
    pub fn new(registry: Registry, transport: Arc<dyn WorkerTransport>, config: &DispatchConfig) -> Self {
        Self {
            registry,
            transport,
            mode: config.mode,
            fan_out_timeout: config.fan_out_timeout(),
            single_best_timeout: config.single_best_timeout(),
            default_steps: config.default_steps,
        }
    }

    /// Route `request` with the configured mode
    pub async fn dispatch(&self, request: &InferRequest) -> InferResponse {
        let mode = self.mode.to_string();
        METRICS
            .dispatch
            .requests_total
            .with_label_values(&[mode.as_str()])
            .inc();

        match self.mode {
            DispatchMode::FanOut => self.dispatch_fan_out(request).await,
            DispatchMode::SingleBest => self.dispatch_single_best(request).await,
        }
    }

    /// Forward to the lowest-latency healthy worker only
    ///
    /// A failure demotes that worker; no second candidate is tried.
    pub async fn dispatch_single_best(&self, request: &InferRequest) -> InferResponse {
        let target = match self.select_single_best() {
            Ok(target) => target,
            Err(e) => return no_healthy_regions(e),
        };

        let worker_request = self.worker_request(request);
        debug!("Routing to {} ({:?} ms)", target.id, target.latency_ms);

        match call_worker(
            self.transport.as_ref(),
            &target.endpoint,
            &worker_request,
            self.single_best_timeout,
        )
        .await
        {
            Ok(success) => {
                self.registry
                    .update(&target.id, WorkerPatch::healthy(success.latency_ms, None));
                info!("Request served by {} in {:.1} ms", target.id, success.latency_ms);

                InferResponse::SingleBest(SingleBestResponse {
                    region_id: target.id,
                    region_slug: target.slug,
                    latency_ms: success.latency_ms,
                    image_url: success.image_url,
                })
            }
            Err(e) => {
                warn!("Worker {} failed: {}", target.id, e);
                self.registry.update(&target.id, WorkerPatch::down(None));

                InferResponse::Error(ErrorResponse {
                    error: REGION_UNAVAILABLE.to_string(),
                    region_id: Some(target.id),
                })
            }
        }
    }

    /// Call every routable worker concurrently and keep the fastest success
    ///
    /// All calls settle before a winner is chosen. Total outage still yields a
    /// full per-region result list with null winner fields.
    pub async fn dispatch_fan_out(&self, request: &InferRequest) -> InferResponse {
        let snapshot = match self.select_fan_out() {
            Ok(snapshot) => snapshot,
            Err(e) => return no_healthy_regions(e),
        };

        let worker_request = Arc::new(self.worker_request(request));
        let handles: Vec<_> = snapshot
            .iter()
            .map(|record| {
                let record = record.clone();
                let registry = self.registry.clone();
                let transport = Arc::clone(&self.transport);
                let worker_request = Arc::clone(&worker_request);
                let timeout = self.fan_out_timeout;

                tokio::spawn(async move {
                    let outcome =
                        call_worker(transport.as_ref(), &record.endpoint, &worker_request, timeout).await;
                    settle(&registry, &record, outcome)
                })
            })
            .collect();

        let results: Vec<RegionResult> = join_all(handles)
            .await
            .into_iter()
            .zip(snapshot.iter())
            .map(|(joined, record)| {
                joined.unwrap_or_else(|e| {
                    let err = InfraZeroError::internal(format!("worker call task failed: {}", e));
                    settle(&self.registry, record, Err(err))
                })
            })
            .collect();

        let winner = pick_winner(&results);
        match winner {
            Some(w) => info!(
                "Fan-out over {} regions won by {} in {:.1} ms",
                results.len(),
                w.region_id,
                w.latency_ms.unwrap_or_default()
            ),
            None => warn!("Fan-out over {} regions: every call failed", results.len()),
        }

        InferResponse::FanOut(FanOutResponse {
            prompt: request.prompt.clone(),
            image_url: winner.and_then(|w| w.image_url.clone()),
            region_id: winner.map(|w| w.region_id.clone()),
            region_slug: winner.map(|w| w.region_slug.clone()),
            region_name: winner.map(|w| w.region_name.clone()),
            latency_ms: winner.and_then(|w| w.latency_ms),
            results,
        })
    }

    /// Lowest-latency healthy worker
    fn select_single_best(&self) -> Result<WorkerRecord> {
        self.registry
            .healthy_sorted()
            .into_iter()
            .next()
            .ok_or_else(|| InfraZeroError::no_eligible_workers("no healthy worker with a latency measurement"))
    }

    /// Every routable worker in registry order
    fn select_fan_out(&self) -> Result<Vec<WorkerRecord>> {
        let snapshot = self.registry.eligible();
        if snapshot.is_empty() {
            return Err(InfraZeroError::no_eligible_workers("no healthy, enabled worker"));
        }
        Ok(snapshot)
    }

    fn worker_request(&self, request: &InferRequest) -> WorkerInferRequest {
        let steps = request
            .params
            .as_ref()
            .and_then(|p| p.steps)
            .unwrap_or(self.default_steps);

        WorkerInferRequest {
            prompt: request.prompt.clone(),
            steps: Some(steps),
        }
    }
}

fn no_healthy_regions(err: InfraZeroError) -> InferResponse {
    METRICS.dispatch.no_healthy_regions.inc();
    warn!("{}", err);
    InferResponse::Error(ErrorResponse::new(NO_HEALTHY_REGIONS))
}

/// Issue one bounded inference call; expiry counts as a failure
async fn call_worker(
    transport: &dyn WorkerTransport,
    endpoint: &str,
    request: &WorkerInferRequest,
    timeout: Duration,
) -> Result<CallSuccess> {
    let start = Instant::now();
    let response = tokio::time::timeout(timeout, transport.infer(endpoint, request))
        .await
        .map_err(|_| InfraZeroError::timeout(format!("inference call exceeded {:?}", timeout)))??;
    let elapsed = start.elapsed();

    let image_url = response
        .image_url
        .ok_or_else(|| InfraZeroError::worker_unavailable("response carried no image_url"))?;

    METRICS
        .dispatch
        .worker_call_duration
        .observe(elapsed.as_secs_f64());

    Ok(CallSuccess {
        latency_ms: elapsed.as_secs_f64() * 1000.0,
        image_url,
    })
}

/// Write a call outcome into the registry and describe it
fn settle(registry: &Registry, record: &WorkerRecord, outcome: Result<CallSuccess>) -> RegionResult {
    match outcome {
        Ok(success) => {
            METRICS.dispatch.worker_calls_total.with_label_values(&["success"]).inc();
            registry.update(&record.id, WorkerPatch::healthy(success.latency_ms, None));

            RegionResult {
                region_id: record.id.clone(),
                region_slug: record.slug.clone(),
                region_name: record.display_name.clone(),
                latency_ms: Some(success.latency_ms),
                image_url: Some(success.image_url),
                error: None,
            }
        }
        Err(e) => {
            METRICS.dispatch.worker_calls_total.with_label_values(&["failure"]).inc();
            warn!("Worker {} failed: {}", record.id, e);
            registry.update(&record.id, WorkerPatch::down(None));

            RegionResult {
                region_id: record.id.clone(),
                region_slug: record.slug.clone(),
                region_name: record.display_name.clone(),
                latency_ms: None,
                image_url: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Fastest successful result; the earliest entry wins ties
fn pick_winner(results: &[RegionResult]) -> Option<&RegionResult> {
    results
        .iter()
        .filter(|r| r.succeeded())
        .fold(None, |best: Option<&RegionResult>, r| match best {
            Some(b) if b.latency_ms <= r.latency_ms => Some(b),
            _ => Some(r),
        })
}
