//! Worker HTTP service

use axum::{extract::State, routing::get, routing::post, Json, Router};
use base64::Engine as _;
use infrazero_proto::WorkerInferRequest;
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Image effect applied by this worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Blur,
    Edge,
    Sharpen,
    Mock,
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Blur => "blur",
            Engine::Edge => "edge",
            Engine::Sharpen => "sharpen",
            Engine::Mock => "mock",
        }
    }

    /// Label reported in inference responses
    pub fn effect(&self) -> &'static str {
        match self {
            Engine::Blur => "blur",
            Engine::Edge => "edge-detect",
            Engine::Sharpen => "sharpen",
            Engine::Mock => "original",
        }
    }

    fn svg_filter(&self) -> &'static str {
        match self {
            Engine::Blur => r#"<filter id="fx"><feGaussianBlur stdDeviation="3"/></filter>"#,
            Engine::Edge => r#"<filter id="fx"><feConvolveMatrix order="3" kernelMatrix="-1 -1 -1 -1 8 -1 -1 -1 -1"/></filter>"#,
            Engine::Sharpen => r#"<filter id="fx"><feConvolveMatrix order="3" kernelMatrix="0 -1 0 -1 5 -1 0 -1 0"/></filter>"#,
            Engine::Mock => "",
        }
    }
}

impl FromStr for Engine {
    type Err = std::convert::Infallible;

    /// Unknown engines fall back to the unmodified image
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "blur" => Engine::Blur,
            "edge" => Engine::Edge,
            "sharpen" => Engine::Sharpen,
            _ => Engine::Mock,
        })
    }
}

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub region: String,
    pub engine: Engine,
    pub port: u16,
    /// Artificial latency added to every inference
    pub delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            region: "unknown".to_string(),
            engine: Engine::Mock,
            port: 8000,
            delay: Duration::ZERO,
        }
    }
}

impl WorkerSettings {
    /// Load from `REGION`, `ENGINE`, `WORKER_PORT` and `WORKER_DELAY_MS`
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let port = match std::env::var("WORKER_PORT") {
            Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("Invalid WORKER_PORT: {}", v))?,
            Err(_) => defaults.port,
        };
        let delay_ms: u64 = match std::env::var("WORKER_DELAY_MS") {
            Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("Invalid WORKER_DELAY_MS: {}", v))?,
            Err(_) => 0,
        };

        Ok(Self {
            region: std::env::var("REGION").unwrap_or(defaults.region),
            engine: std::env::var("ENGINE")
                .ok()
                .and_then(|e| e.parse().ok())
                .unwrap_or(defaults.engine),
            port,
            delay: Duration::from_millis(delay_ms),
        })
    }
}

#[derive(Debug, Serialize)]
struct InferReply {
    prompt: String,
    image_url: String,
    region_id: String,
    region_slug: String,
    region_name: String,
    latency_ms: u64,
    effect: &'static str,
    error: Option<String>,
}

pub fn router(settings: Arc<WorkerSettings>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/infer", post(infer_handler))
        .with_state(settings)
}

async fn health_handler(State(settings): State<Arc<WorkerSettings>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "region": settings.region,
        "engine": settings.engine.name(),
        "model": "multi-region-image-pipeline",
    }))
}

async fn infer_handler(
    State(settings): State<Arc<WorkerSettings>>,
    Json(request): Json<WorkerInferRequest>,
) -> Json<InferReply> {
    let start = Instant::now();
    if !settings.delay.is_zero() {
        tokio::time::sleep(settings.delay).await;
    }

    let image_url = placeholder_image(&request.prompt, settings.engine);
    let latency_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Rendered prompt ({} steps) in {} ms",
        request.steps.unwrap_or(20),
        latency_ms
    );

    Json(InferReply {
        prompt: request.prompt,
        image_url,
        region_id: settings.region.clone(),
        region_slug: settings.region.clone(),
        region_name: settings.region.clone(),
        latency_ms,
        effect: settings.engine.effect(),
        error: None,
    })
}

/// Deterministic 512x512 SVG placeholder seeded by the prompt
pub fn placeholder_image(prompt: &str, engine: Engine) -> String {
    let seed = xxh3_64(prompt.as_bytes());
    let (r, g, b) = ((seed >> 16) as u8, (seed >> 8) as u8, seed as u8);
    let filter = engine.svg_filter();
    let filter_ref = if filter.is_empty() { "" } else { r#" filter="url(#fx)""# };

    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="512" height="512"><defs>{filter}</defs><g{filter_ref}><rect width="512" height="512" fill="rgb({r},{g},{b})"/><circle cx="{cx}" cy="{cy}" r="96" fill="rgb({g},{b},{r})"/></g></svg>"#,
        cx = 128 + (seed >> 24) % 256,
        cy = 128 + (seed >> 32) % 256,
    );

    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg)
    )
}
