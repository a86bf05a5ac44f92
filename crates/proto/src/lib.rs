//! InfraZero wire types
//!
//! JSON bodies shared by the control plane and the regional workers. Field
//! names are part of the external contract and must not be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker health state as tracked by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered, not yet probed successfully
    Starting,

    /// Last probe or inference call succeeded
    Healthy,

    /// Last probe or inference call failed, or the worker was killed
    Down,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Healthy => "healthy",
            WorkerStatus::Down => "down",
        };
        f.write_str(s)
    }
}

/// One fleet member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Registry key
    pub id: String,

    /// Short region code (e.g. "ewr")
    pub slug: String,

    /// Human-readable region label
    pub display_name: String,

    /// host:port of the worker HTTP surface
    pub endpoint: String,

    pub status: WorkerStatus,

    /// Round-trip of the most recent successful probe or call
    pub latency_ms: Option<f64>,

    /// Time of the last probe attempt
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Soft-delete marker; terminal once set
    pub disabled: bool,
}

impl WorkerRecord {
    /// Create a record in the `starting` state
    pub fn new(
        id: impl Into<String>,
        slug: impl Into<String>,
        display_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            slug: slug.into(),
            display_name: display_name.into(),
            endpoint: endpoint.into(),
            status: WorkerStatus::Starting,
            latency_ms: None,
            last_checked_at: None,
            disabled: false,
        }
    }

    /// Whether the dispatcher may route to this worker
    pub fn is_routable(&self) -> bool {
        !self.disabled && self.status == WorkerStatus::Healthy
    }
}

// Control plane HTTP surface

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    pub service: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            model: default_model(),
        }
    }
}

fn default_regions() -> Vec<String> {
    vec!["ewr".to_string(), "ams".to_string(), "sgp".to_string()]
}

fn default_model() -> String {
    "stable-diffusion-stub".to_string()
}

/// Body of `POST /deploy/global` and `GET /regions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub deployment_id: String,
    pub regions: Vec<WorkerRecord>,
}

/// Optional generation parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferParams {
    pub steps: Option<u32>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferRequest {
    pub prompt: String,

    #[serde(default)]
    pub params: Option<InferParams>,
}

/// Outcome of one worker call during a fan-out dispatch
///
/// Exactly one of `image_url` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    pub region_id: String,
    pub region_slug: String,
    pub region_name: String,
    pub latency_ms: Option<f64>,
    pub image_url: Option<String>,
    pub error: Option<String>,
}

impl RegionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleBestResponse {
    pub region_id: String,
    pub region_slug: String,
    pub latency_ms: f64,
    pub image_url: String,
}

/// Aggregated fan-out result; the winner fields are null on total outage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutResponse {
    pub prompt: String,
    pub image_url: Option<String>,
    pub region_id: Option<String>,
    pub region_slug: Option<String>,
    pub region_name: Option<String>,
    pub latency_ms: Option<f64>,
    pub results: Vec<RegionResult>,
}

/// Structured soft error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            region_id: None,
        }
    }
}

/// Body of `POST /infer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InferResponse {
    FanOut(FanOutResponse),
    SingleBest(SingleBestResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResponse {
    pub region_id: String,
    pub status: String,
}

// Worker contract

/// Body of a worker's `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub status: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body forwarded to a worker's `POST /infer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInferRequest {
    pub prompt: String,

    #[serde(default)]
    pub steps: Option<u32>,
}

/// Body returned by a worker's `POST /infer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInferResponse {
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
