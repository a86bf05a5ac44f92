//! Worker client for communication from the control plane to regional workers

use async_trait::async_trait;
use infrazero_common::error::{InfraZeroError, Result};
use infrazero_proto::{WorkerHealth, WorkerInferRequest, WorkerInferResponse};
use std::time::Duration;

/// Calls a worker's two-endpoint HTTP contract
///
/// Implementations report any non-success as an error. Callers bound every
/// call with their own timeout.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// `GET {endpoint}{path}`
    async fn probe(&self, endpoint: &str, path: &str) -> Result<WorkerHealth>;

    /// `POST {endpoint}/infer`
    async fn infer(&self, endpoint: &str, request: &WorkerInferRequest) -> Result<WorkerInferResponse>;
}

/// HTTP worker client
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    /// Create a client; `connect_timeout` bounds TCP connection setup only
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client })
    }

    fn url(endpoint: &str, path: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}{}", endpoint.trim_end_matches('/'), path)
        } else {
            format!("http://{}{}", endpoint.trim_end_matches('/'), path)
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(InfraZeroError::worker_unavailable(format!(
                "HTTP {} from {}",
                status,
                response.url()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerClient {
    async fn probe(&self, endpoint: &str, path: &str) -> Result<WorkerHealth> {
        let response = self
            .client
            .get(Self::url(endpoint, path))
            .send()
            .await
            .map_err(|e| InfraZeroError::connection(format!("Health probe to {} failed: {}", endpoint, e)))?;

        let health = Self::check(response).await?.json::<WorkerHealth>().await?;
        Ok(health)
    }

    async fn infer(&self, endpoint: &str, request: &WorkerInferRequest) -> Result<WorkerInferResponse> {
        let response = self
            .client
            .post(Self::url(endpoint, "/infer"))
            .json(request)
            .send()
            .await
            .map_err(|e| InfraZeroError::connection(format!("Inference call to {} failed: {}", endpoint, e)))?;

        let body = Self::check(response).await?.json::<WorkerInferResponse>().await?;
        Ok(body)
    }
}
