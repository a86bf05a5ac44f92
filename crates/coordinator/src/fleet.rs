//! Fleet controller
//!
//! Populates the registry, either from the static worker list (mock mode) or
//! by provisioning one VM per requested region (live mode), and handles
//! administrative kills.

use crate::provisioner::{ProvisionedInstance, Provisioner};
use crate::registry::Registry;
use infrazero_common::config::{ControlPlaneConfig, ProvisioningConfig, StaticWorkerConfig};
use infrazero_common::error::Result;
use infrazero_common::FleetMode;
use infrazero_proto::{DeployRequest, FleetSnapshot, KillResponse, WorkerRecord};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Deployment id reported while the static fleet is installed
pub const MOCK_DEPLOYMENT_ID: &str = "mock-deployment";

pub struct FleetController {
    mode: FleetMode,
    registry: Registry,
    provisioner: Arc<dyn Provisioner>,
    static_workers: Vec<StaticWorkerConfig>,
    provisioning: ProvisioningConfig,
    deployment_id: RwLock<String>,
}

impl FleetController {
    pub fn new(config: &ControlPlaneConfig, registry: Registry, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            mode: config.mode,
            registry,
            provisioner,
            static_workers: config.mock_workers.clone(),
            provisioning: config.provisioning.clone(),
            deployment_id: RwLock::new(MOCK_DEPLOYMENT_ID.to_string()),
        }
    }

    pub fn mode(&self) -> FleetMode {
        self.mode
    }

    pub fn deployment_id(&self) -> String {
        self.deployment_id.read().clone()
    }

    /// Current deployment id and registry contents
    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            deployment_id: self.deployment_id(),
            regions: self.registry.list_all(),
        }
    }

    /// Install every configured static worker in the `starting` state
    pub fn seed_static(&self) -> FleetSnapshot {
        self.install_static(|_| true)
    }

    fn install_static(&self, wanted: impl Fn(&StaticWorkerConfig) -> bool) -> FleetSnapshot {
        let records: Vec<WorkerRecord> = self
            .static_workers
            .iter()
            .filter(|w| wanted(w))
            .map(|w| WorkerRecord::new(&w.id, &w.slug, &w.display_name, &w.endpoint))
            .collect();

        self.registry.replace_all(records.clone());
        *self.deployment_id.write() = MOCK_DEPLOYMENT_ID.to_string();
        info!("Installed {} static workers", records.len());

        FleetSnapshot {
            deployment_id: MOCK_DEPLOYMENT_ID.to_string(),
            regions: records,
        }
    }

    /// Replace the fleet with one worker per requested region
    ///
    /// In live mode every instance must be created before the registry is
    /// touched; on failure the instances created so far are deleted and the
    /// error is returned.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<FleetSnapshot> {
        match self.mode {
            FleetMode::Mock => {
                let slugs = &request.regions;
                Ok(self.install_static(|w| slugs.is_empty() || slugs.contains(&w.slug)))
            }
            FleetMode::Live => self.deploy_live(request).await,
        }
    }

    async fn deploy_live(&self, request: &DeployRequest) -> Result<FleetSnapshot> {
        info!(
            "Provisioning {} regions for model {}",
            request.regions.len(),
            request.model
        );

        let mut created: Vec<(String, ProvisionedInstance)> = Vec::with_capacity(request.regions.len());
        for slug in &request.regions {
            let label = format!("infrazero-{}", slug);
            match self.provisioner.create(slug, &label).await {
                Ok(instance) => created.push((slug.clone(), instance)),
                Err(e) => {
                    error!("Provisioning {} failed: {}", slug, e);
                    self.rollback(&created).await;
                    return Err(e);
                }
            }
        }

        let records: Vec<WorkerRecord> = created
            .into_iter()
            .map(|(slug, instance)| {
                WorkerRecord::new(
                    instance.id,
                    &slug,
                    self.provisioning.region_name(&slug),
                    format!("{}:{}", instance.ip, self.provisioning.worker_port),
                )
            })
            .collect();

        let deployment_id = format!("deploy-{}", Uuid::new_v4());
        self.registry.replace_all(records.clone());
        *self.deployment_id.write() = deployment_id.clone();
        info!("Deployment {} installed {} workers", deployment_id, records.len());

        Ok(FleetSnapshot {
            deployment_id,
            regions: records,
        })
    }

    async fn rollback(&self, created: &[(String, ProvisionedInstance)]) {
        for (slug, instance) in created {
            if let Err(e) = self.provisioner.delete(&instance.id).await {
                warn!("Rollback of {} instance {} failed: {}", slug, instance.id, e);
            }
        }
    }

    /// Permanently remove `id` from probing and routing
    ///
    /// In live mode the VM is deleted first; if that fails the registry is
    /// left unchanged.
    pub async fn kill(&self, id: &str) -> Result<KillResponse> {
        if self.registry.get(id).is_none() {
            warn!("Kill requested for unknown worker {}", id);
            return Ok(KillResponse {
                region_id: id.to_string(),
                status: "not found".to_string(),
            });
        }

        let status = match self.mode {
            FleetMode::Mock => "down (mock)",
            FleetMode::Live => {
                self.provisioner.delete(id).await?;
                "terminating"
            }
        };

        self.registry.disable(id);
        info!("Worker {} disabled ({})", id, status);

        Ok(KillResponse {
            region_id: id.to_string(),
            status: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use infrazero_common::InfraZeroError;
    use infrazero_proto::WorkerStatus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeProvisioner {
        fail_region: Option<String>,
        fail_delete: bool,
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn create(&self, region: &str, label: &str) -> Result<ProvisionedInstance> {
            if self.fail_region.as_deref() == Some(region) {
                return Err(InfraZeroError::provisioning(format!("quota exceeded in {}", region)));
            }
            assert_eq!(label, format!("infrazero-{}", region));
            let id = format!("vm-{}", region);
            self.created.lock().push(id.clone());
            Ok(ProvisionedInstance {
                id,
                ip: "198.51.100.1".to_string(),
            })
        }

        async fn delete(&self, id: &str) -> Result<()> {
            if self.fail_delete {
                return Err(InfraZeroError::provisioning("api down"));
            }
            self.deleted.lock().push(id.to_string());
            Ok(())
        }
    }

    fn controller(mode: FleetMode, provisioner: Arc<FakeProvisioner>) -> (FleetController, Registry) {
        let config = ControlPlaneConfig {
            mode,
            ..ControlPlaneConfig::default()
        };
        let registry = Registry::new();
        (FleetController::new(&config, registry.clone(), provisioner), registry)
    }

    fn deploy_request(regions: &[&str]) -> DeployRequest {
        DeployRequest {
            regions: regions.iter().map(|s| s.to_string()).collect(),
            ..DeployRequest::default()
        }
    }

    #[test]
    fn test_seed_static() {
        let (fleet, registry) = controller(FleetMode::Mock, Arc::new(FakeProvisioner::default()));

        let snapshot = fleet.seed_static();

        assert_eq!(snapshot.deployment_id, MOCK_DEPLOYMENT_ID);
        assert_eq!(registry.len(), 3);
        assert!(registry
            .list_all()
            .iter()
            .all(|r| r.status == WorkerStatus::Starting && !r.disabled));
    }

    #[tokio::test]
    async fn test_mock_deploy_filters_by_slug() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let (fleet, registry) = controller(FleetMode::Mock, provisioner.clone());
        fleet.seed_static();

        let snapshot = fleet.deploy(&deploy_request(&["ams", "xyz"])).await.unwrap();

        assert_eq!(snapshot.regions.len(), 1);
        assert_eq!(registry.list_all()[0].id, "ams-1");
        assert!(provisioner.created.lock().is_empty());
    }

    #[tokio::test]
    async fn test_live_deploy_installs_instances() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let (fleet, registry) = controller(FleetMode::Live, provisioner);

        let snapshot = fleet.deploy(&deploy_request(&["ewr", "fra"])).await.unwrap();

        assert!(snapshot.deployment_id.starts_with("deploy-"));
        assert_eq!(fleet.deployment_id(), snapshot.deployment_id);
        let records = registry.list_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "vm-ewr");
        assert_eq!(records[0].display_name, "US-East (EWR)");
        assert_eq!(records[0].endpoint, "198.51.100.1:8000");
        assert_eq!(records[1].display_name, "fra");
    }

    #[tokio::test]
    async fn test_live_deploy_failure_leaves_registry_untouched() {
        let provisioner = Arc::new(FakeProvisioner {
            fail_region: Some("sgp".to_string()),
            ..FakeProvisioner::default()
        });
        let (fleet, registry) = controller(FleetMode::Live, provisioner.clone());
        fleet.seed_static();
        let before = registry.list_all();

        let err = fleet.deploy(&deploy_request(&["ewr", "ams", "sgp"])).await.unwrap_err();

        assert!(matches!(err, InfraZeroError::Provisioning(_)));
        assert_eq!(registry.list_all(), before);
        assert_eq!(fleet.deployment_id(), MOCK_DEPLOYMENT_ID);
        assert_eq!(*provisioner.deleted.lock(), vec!["vm-ewr", "vm-ams"]);
    }

    #[tokio::test]
    async fn test_kill_mock_disables_worker() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let (fleet, registry) = controller(FleetMode::Mock, provisioner.clone());
        fleet.seed_static();

        let response = fleet.kill("ewr-1").await.unwrap();

        assert_eq!(response.status, "down (mock)");
        let r = registry.get("ewr-1").unwrap();
        assert!(r.disabled);
        assert_eq!(r.status, WorkerStatus::Down);
        assert!(provisioner.deleted.lock().is_empty());

        let missing = fleet.kill("nope").await.unwrap();
        assert_eq!(missing.status, "not found");
    }

    #[tokio::test]
    async fn test_kill_live_delete_failure_keeps_worker() {
        let provisioner = Arc::new(FakeProvisioner {
            fail_delete: true,
            ..FakeProvisioner::default()
        });
        let (fleet, registry) = controller(FleetMode::Live, provisioner);
        fleet.deploy(&deploy_request(&["ewr"])).await.unwrap();

        assert!(fleet.kill("vm-ewr").await.is_err());
        assert!(!registry.get("vm-ewr").unwrap().disabled);
    }
}
