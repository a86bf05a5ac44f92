//! Metrics collection for InfraZero
//!
//! This module provides Prometheus metrics for the control plane.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics registry for InfraZero
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub prober: ProberMetrics,
    pub dispatch: DispatchMetrics,
    pub fleet: FleetMetrics,
}

/// Health prober metrics
#[derive(Debug, Clone)]
pub struct ProberMetrics {
    /// Probe outcomes, labelled `outcome=healthy|down`
    pub probes_total: IntCounterVec,

    /// Completed probe rounds
    pub rounds_total: IntCounter,
}

/// Dispatcher metrics
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Dispatches, labelled by routing mode
    pub requests_total: IntCounterVec,

    /// Worker inference calls, labelled `outcome=success|failure`
    pub worker_calls_total: IntCounterVec,

    /// Worker inference round-trip
    pub worker_call_duration: Histogram,

    /// Dispatches rejected because no worker was routable
    pub no_healthy_regions: IntCounter,
}

/// Fleet metrics
#[derive(Debug, Clone)]
pub struct FleetMetrics {
    /// Workers currently marked healthy
    pub healthy_workers: IntGauge,

    /// Workers currently in the registry
    pub registry_workers: IntGauge,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry =
        MetricsRegistry::new().expect("control plane metrics have valid, unique names");
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let probes_total = IntCounterVec::new(
            Opts::new("infrazero_probes_total", "Health probes by outcome"),
            &["outcome"],
        )?;

        let rounds_total = IntCounter::new(
            "infrazero_probe_rounds_total",
            "Completed health probe rounds",
        )?;

        let requests_total = IntCounterVec::new(
            Opts::new("infrazero_dispatch_requests_total", "Inference dispatches by routing mode"),
            &["mode"],
        )?;

        let worker_calls_total = IntCounterVec::new(
            Opts::new("infrazero_worker_calls_total", "Worker inference calls by outcome"),
            &["outcome"],
        )?;

        let worker_call_duration = Histogram::with_opts(
            HistogramOpts::new(
                "infrazero_worker_call_duration_seconds",
                "Worker inference call duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let no_healthy_regions = IntCounter::new(
            "infrazero_no_healthy_regions_total",
            "Dispatches rejected because no region was healthy",
        )?;

        let healthy_workers = IntGauge::new(
            "infrazero_healthy_workers",
            "Workers currently marked healthy",
        )?;

        let registry_workers = IntGauge::new(
            "infrazero_registry_workers",
            "Workers currently tracked by the registry",
        )?;

        registry.register(Box::new(probes_total.clone()))?;
        registry.register(Box::new(rounds_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(worker_calls_total.clone()))?;
        registry.register(Box::new(worker_call_duration.clone()))?;
        registry.register(Box::new(no_healthy_regions.clone()))?;
        registry.register(Box::new(healthy_workers.clone()))?;
        registry.register(Box::new(registry_workers.clone()))?;

        Ok(MetricsRegistry {
            registry,
            prober: ProberMetrics {
                probes_total,
                rounds_total,
            },
            dispatch: DispatchMetrics {
                requests_total,
                worker_calls_total,
                worker_call_duration,
                no_healthy_regions,
            },
            fleet: FleetMetrics {
                healthy_workers,
                registry_workers,
            },
        })
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
