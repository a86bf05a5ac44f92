//! Cloud provisioning client
//!
//! The fleet controller only needs to create and delete worker VMs. Every
//! failure surfaces as [`InfraZeroError::Provisioning`].

use async_trait::async_trait;
use infrazero_common::config::ProvisioningConfig;
use infrazero_common::error::{InfraZeroError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// A freshly created worker VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedInstance {
    pub id: String,
    pub ip: String,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a VM in `region`
    async fn create(&self, region: &str, label: &str) -> Result<ProvisionedInstance>;

    /// Destroy the VM with `id`
    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct CreateInstanceBody<'a> {
    region: &'a str,
    plan: &'a str,
    os_id: u32,
    label: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceResponse {
    instance: InstanceBody,
}

#[derive(Debug, Deserialize)]
struct InstanceBody {
    id: String,
    main_ip: String,
}

/// Vultr v2 API client
#[derive(Debug, Clone)]
pub struct VultrClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    plan: String,
    os_id: u32,
}

impl VultrClient {
    pub fn new(config: &ProvisioningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            plan: config.plan.clone(),
            os_id: config.os_id,
        })
    }

    async fn error_for(context: &str, response: reqwest::Response) -> InfraZeroError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        InfraZeroError::provisioning(format!("{}: HTTP {} {}", context, status, body.trim()))
    }
}

#[async_trait]
impl Provisioner for VultrClient {
    async fn create(&self, region: &str, label: &str) -> Result<ProvisionedInstance> {
        let context = format!("create instance in {}", region);
        let response = self
            .client
            .post(format!("{}/instances", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&CreateInstanceBody {
                region,
                plan: &self.plan,
                os_id: self.os_id,
                label,
            })
            .send()
            .await
            .map_err(|e| InfraZeroError::provisioning(format!("{}: {}", context, e)))?;

        if !response.status().is_success() {
            return Err(Self::error_for(&context, response).await);
        }

        let body: CreateInstanceResponse = response
            .json()
            .await
            .map_err(|e| InfraZeroError::provisioning(format!("{}: malformed response: {}", context, e)))?;

        info!("Created instance {} in {} ({})", body.instance.id, region, body.instance.main_ip);
        Ok(ProvisionedInstance {
            id: body.instance.id,
            ip: body.instance.main_ip,
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let context = format!("delete instance {}", id);
        let response = self
            .client
            .delete(format!("{}/instances/{}", self.api_base, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| InfraZeroError::provisioning(format!("{}: {}", context, e)))?;

        if !response.status().is_success() {
            return Err(Self::error_for(&context, response).await);
        }

        info!("Deleted instance {}", id);
        Ok(())
    }
}
