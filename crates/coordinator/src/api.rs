//! Control-plane HTTP surface

use crate::dispatcher::Dispatcher;
use crate::fleet::FleetController;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use infrazero_common::{InfraZeroError, METRICS};
use infrazero_proto::{DeployRequest, ErrorResponse, InferRequest, ServiceHealth};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetController>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(fleet: Arc<FleetController>, dispatcher: Dispatcher) -> Self {
        Self { fleet, dispatcher }
    }
}

/// Error returned by fleet operations
struct ApiError(InfraZeroError);

impl From<InfraZeroError> for ApiError {
    fn from(err: InfraZeroError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        error!("Request failed: {}", self.0);
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/deploy/global", post(deploy_handler))
        .route("/regions", get(regions_handler))
        .route("/infer", post(infer_handler))
        .route("/kill/{region_id}", post(kill_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `cancel` fires
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    debug!("Control plane listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ServiceHealth {
        status: "ok".to_string(),
        service: "control-plane".to_string(),
        mode: state.fleet.mode().to_string(),
    })
}

async fn deploy_handler(
    State(state): State<AppState>,
    body: Option<Json<DeployRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let snapshot = state.fleet.deploy(&request).await?;
    Ok(Json(snapshot))
}

async fn regions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fleet.snapshot())
}

async fn infer_handler(
    State(state): State<AppState>,
    body: Result<Json<InferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| InfraZeroError::invalid_input(e.body_text()))?;
    Ok(Json(state.dispatcher.dispatch(&request).await))
}

async fn kill_handler(
    State(state): State<AppState>,
    Path(region_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.fleet.kill(&region_id).await?;
    Ok(Json(response))
}

async fn metrics_handler() -> Response {
    match METRICS.gather() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics".to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::{ProvisionedInstance, Provisioner};
    use crate::registry::{Registry, WorkerPatch};
    use crate::worker_client::WorkerTransport;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use infrazero_common::{ControlPlaneConfig, FleetMode, Result};
    use infrazero_proto::{WorkerHealth, WorkerInferRequest, WorkerInferResponse};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct EchoTransport;

    #[async_trait]
    impl WorkerTransport for EchoTransport {
        async fn probe(&self, _endpoint: &str, _path: &str) -> Result<WorkerHealth> {
            Err(InfraZeroError::internal("unused"))
        }

        async fn infer(&self, endpoint: &str, request: &WorkerInferRequest) -> Result<WorkerInferResponse> {
            Ok(WorkerInferResponse {
                image_url: Some(format!("{}:{}", endpoint, request.prompt)),
                extra: Default::default(),
            })
        }
    }

    struct BrokenProvisioner;

    #[async_trait]
    impl Provisioner for BrokenProvisioner {
        async fn create(&self, _region: &str, _label: &str) -> Result<ProvisionedInstance> {
            Err(InfraZeroError::provisioning("api key rejected"))
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            Err(InfraZeroError::provisioning("api key rejected"))
        }
    }

    fn app(mode: FleetMode) -> (Router, Registry) {
        let config = ControlPlaneConfig {
            mode,
            ..ControlPlaneConfig::default()
        };
        let registry = Registry::new();
        let fleet = Arc::new(FleetController::new(&config, registry.clone(), Arc::new(BrokenProvisioner)));
        fleet.seed_static();
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(EchoTransport), &config.dispatch);
        (router(AppState::new(fleet, dispatcher)), registry)
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(FleetMode::Mock);

        let (status, body) = call(app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "service": "control-plane", "mode": "mock"}));
    }

    #[tokio::test]
    async fn test_regions_lists_seeded_workers() {
        let (app, _) = app(FleetMode::Mock);

        let (status, body) = call(app, "GET", "/regions", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deployment_id"], "mock-deployment");
        assert_eq!(body["regions"].as_array().unwrap().len(), 3);
        assert_eq!(body["regions"][0]["status"], "starting");
    }

    #[tokio::test]
    async fn test_infer_without_healthy_regions_is_soft_error() {
        let (app, _) = app(FleetMode::Mock);

        let (status, body) = call(app, "POST", "/infer", Some(json!({"prompt": "a cat"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"error": "no healthy regions"}));
    }

    #[tokio::test]
    async fn test_infer_rejects_malformed_body() {
        let (app, _) = app(FleetMode::Mock);

        let (status, body) = call(app, "POST", "/infer", Some(json!({"params": {"steps": 4}}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let (app, _) = app(FleetMode::Mock);
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/infer")
            .header("origin", "http://dashboard.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().contains_key("access-control-allow-methods"));
    }

    #[tokio::test]
    async fn test_cors_header_on_simple_request() {
        let (app, _) = app(FleetMode::Mock);
        let request = Request::builder()
            .uri("/regions")
            .header("origin", "http://dashboard.example")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_infer_fan_out() {
        let (app, registry) = app(FleetMode::Mock);
        registry.update("ams-1", WorkerPatch::healthy(12.0, None));

        let (status, body) = call(app, "POST", "/infer", Some(json!({"prompt": "a cat"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prompt"], "a cat");
        assert_eq!(body["region_id"], "ams-1");
        assert_eq!(body["image_url"], "127.0.0.1:8002:a cat");
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["error"], Value::Null);
    }

    #[tokio::test]
    async fn test_kill_then_regions() {
        let (app, registry) = app(FleetMode::Mock);
        registry.update("sgp-1", WorkerPatch::healthy(12.0, None));

        let (status, body) = call(app.clone(), "POST", "/kill/sgp-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"region_id": "sgp-1", "status": "down (mock)"}));

        let (_, body) = call(app, "GET", "/regions", None).await;
        let sgp = &body["regions"][2];
        assert_eq!(sgp["disabled"], true);
        assert_eq!(sgp["status"], "down");
        assert_eq!(sgp["latency_ms"], Value::Null);
    }

    #[tokio::test]
    async fn test_live_deploy_failure_maps_to_bad_gateway() {
        let (app, registry) = app(FleetMode::Live);

        let (status, body) = call(app, "POST", "/deploy/global", Some(json!({"regions": ["ewr"]}))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("api key rejected"));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_deploy_without_body_uses_defaults() {
        let (app, _) = app(FleetMode::Mock);

        let (status, body) = call(app, "POST", "/deploy/global", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["regions"].as_array().unwrap().len(), 3);
    }
}
