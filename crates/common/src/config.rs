//! Configuration structures for InfraZero
//!
//! This module defines the control-plane configuration.
//! Configurations are loaded from YAML files and can be overridden by environment variables.

use crate::error::{InfraZeroError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming an optional YAML config file
pub const CONFIG_PATH_ENV: &str = "INFRAZERO_CONFIG";

/// Prefix of per-region worker endpoint overrides (`INFRAZERO_WORKER_AMS=host:port`)
pub const WORKER_OVERRIDE_PREFIX: &str = "INFRAZERO_WORKER_";

/// How the fleet is populated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    /// Static worker addresses from configuration
    #[default]
    Mock,

    /// Workers provisioned through the cloud API
    Live,
}

impl std::fmt::Display for FleetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FleetMode::Mock => f.write_str("mock"),
            FleetMode::Live => f.write_str("live"),
        }
    }
}

impl FromStr for FleetMode {
    type Err = InfraZeroError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(FleetMode::Mock),
            "live" | "vultr" => Ok(FleetMode::Live),
            other => Err(InfraZeroError::config(format!("Invalid mode: {}", other))),
        }
    }
}

/// Routing strategy for inference requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Call every eligible worker and keep the fastest success
    #[default]
    FanOut,

    /// Call only the lowest-latency healthy worker
    SingleBest,
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::FanOut => f.write_str("fan_out"),
            DispatchMode::SingleBest => f.write_str("single_best"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = InfraZeroError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fan_out" | "fanout" => Ok(DispatchMode::FanOut),
            "single_best" | "single" => Ok(DispatchMode::SingleBest),
            other => Err(InfraZeroError::config(format!("Invalid dispatch mode: {}", other))),
        }
    }
}

/// Top-level configuration for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Fleet population mode
    #[serde(default)]
    pub mode: FleetMode,

    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Health prober settings
    #[serde(default)]
    pub prober: ProberConfig,

    /// Inference dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Static fleet used in mock mode
    #[serde(default = "default_mock_workers")]
    pub mock_workers: Vec<StaticWorkerConfig>,

    /// Cloud provisioning settings used in live mode
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// Health prober configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProberConfig {
    /// Pause between rounds, measured from the end of a round
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Per-probe timeout
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Worker health path
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
            health_path: default_health_path(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,

    /// Shared per-call timeout in fan-out mode
    #[serde(default = "default_fan_out_timeout")]
    pub fan_out_timeout_secs: u64,

    /// Call timeout in single-best mode
    #[serde(default = "default_single_best_timeout")]
    pub single_best_timeout_secs: u64,

    /// Steps forwarded to workers when the request carries none
    #[serde(default = "default_steps")]
    pub default_steps: u32,
}

impl DispatchConfig {
    /// Get the shared fan-out call timeout as Duration
    pub fn fan_out_timeout(&self) -> Duration {
        Duration::from_secs(self.fan_out_timeout_secs)
    }

    /// Get the single-best call timeout as Duration
    pub fn single_best_timeout(&self) -> Duration {
        Duration::from_secs(self.single_best_timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            fan_out_timeout_secs: default_fan_out_timeout(),
            single_best_timeout_secs: default_single_best_timeout(),
            default_steps: default_steps(),
        }
    }
}

/// Statically addressed worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticWorkerConfig {
    pub id: String,
    pub slug: String,
    pub display_name: String,
    pub endpoint: String,
}

impl StaticWorkerConfig {
    fn new(id: &str, slug: &str, display_name: &str, endpoint: &str) -> Self {
        Self {
            id: id.to_string(),
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// Cloud provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer token; never serialized back out
    #[serde(default, skip_serializing)]
    pub api_key: String,

    #[serde(default = "default_plan")]
    pub plan: String,

    #[serde(default = "default_os_id")]
    pub os_id: u32,

    /// Port the worker service listens on inside each instance
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,

    #[serde(default = "default_provisioning_timeout")]
    pub request_timeout_secs: u64,

    /// Display names by region slug
    #[serde(default = "default_region_names")]
    pub region_names: BTreeMap<String, String>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            plan: default_plan(),
            os_id: default_os_id(),
            worker_port: default_worker_port(),
            request_timeout_secs: default_provisioning_timeout(),
            region_names: default_region_names(),
        }
    }
}

impl ProvisioningConfig {
    /// Display name for a region slug, falling back to the slug itself
    pub fn region_name(&self, slug: &str) -> String {
        self.region_names
            .get(slug)
            .cloned()
            .unwrap_or_else(|| slug.to_string())
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_probe_interval() -> u64 {
    3
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_fan_out_timeout() -> u64 {
    60
}

fn default_single_best_timeout() -> u64 {
    10
}

fn default_steps() -> u32 {
    20
}

fn default_mock_workers() -> Vec<StaticWorkerConfig> {
    vec![
        StaticWorkerConfig::new("ewr-1", "ewr", "US-East (EWR)", "127.0.0.1:8001"),
        StaticWorkerConfig::new("ams-1", "ams", "EU (Amsterdam)", "127.0.0.1:8002"),
        StaticWorkerConfig::new("sgp-1", "sgp", "Asia (Singapore)", "127.0.0.1:8003"),
    ]
}

fn default_api_base() -> String {
    "https://api.vultr.com/v2".to_string()
}

fn default_plan() -> String {
    "vc2-1c-1gb".to_string()
}

fn default_os_id() -> u32 {
    387
}

fn default_worker_port() -> u16 {
    8000
}

fn default_provisioning_timeout() -> u64 {
    120
}

fn default_region_names() -> BTreeMap<String, String> {
    [
        ("ewr", "US-East (EWR)"),
        ("ams", "EU (Amsterdam)"),
        ("sgp", "Asia (Singapore)"),
    ]
    .into_iter()
    .map(|(slug, name)| (slug.to_string(), name.to_string()))
    .collect()
}

/// Scalar overrides read from `INFRAZERO_*` variables
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    mode: Option<String>,
    bind_address: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    prober: ProberOverrides,
    #[serde(default)]
    dispatch: DispatchOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct ProberOverrides {
    interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchOverrides {
    mode: Option<String>,
    fan_out_timeout_secs: Option<u64>,
    single_best_timeout_secs: Option<u64>,
}

/// Provisioning credentials read from `VULTR_*` variables
#[derive(Debug, Default, Deserialize)]
struct VendorOverrides {
    api_key: Option<String>,
    plan: Option<String>,
    os_id: Option<u32>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            mode: FleetMode::default(),
            bind_address: default_bind_address(),
            port: default_port(),
            prober: ProberConfig::default(),
            dispatch: DispatchConfig::default(),
            mock_workers: default_mock_workers(),
            provisioning: ProvisioningConfig::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| InfraZeroError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: ControlPlaneConfig = serde_yaml::from_str(&content)
            .map_err(|e| InfraZeroError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        Ok(config)
    }

    /// Load defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = ControlPlaneConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load the file named by `INFRAZERO_CONFIG` (if any), then apply environment
    /// overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => ControlPlaneConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `INFRAZERO_*`, `VULTR_*` and per-region worker overrides
    pub fn apply_env(&mut self) -> Result<()> {
        let overrides: EnvOverrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("INFRAZERO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| InfraZeroError::config(format!("Invalid INFRAZERO_* environment: {}", e)))?;
        self.apply_overrides(overrides)?;

        let vendor: VendorOverrides = config::Config::builder()
            .add_source(config::Environment::with_prefix("VULTR").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| InfraZeroError::config(format!("Invalid VULTR_* environment: {}", e)))?;
        if let Some(api_key) = vendor.api_key {
            self.provisioning.api_key = api_key;
        }
        if let Some(plan) = vendor.plan {
            self.provisioning.plan = plan;
        }
        if let Some(os_id) = vendor.os_id {
            self.provisioning.os_id = os_id;
        }

        self.apply_worker_overrides(std::env::vars());
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: EnvOverrides) -> Result<()> {
        if let Some(mode) = overrides.mode {
            self.mode = mode.parse()?;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(secs) = overrides.prober.interval_secs {
            self.prober.interval_secs = secs;
        }
        if let Some(secs) = overrides.prober.timeout_secs {
            self.prober.timeout_secs = secs;
        }
        if let Some(mode) = overrides.dispatch.mode {
            self.dispatch.mode = mode.parse()?;
        }
        if let Some(secs) = overrides.dispatch.fan_out_timeout_secs {
            self.dispatch.fan_out_timeout_secs = secs;
        }
        if let Some(secs) = overrides.dispatch.single_best_timeout_secs {
            self.dispatch.single_best_timeout_secs = secs;
        }
        Ok(())
    }

    /// Replace mock worker endpoints from `INFRAZERO_WORKER_<SLUG>` pairs
    pub fn apply_worker_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(slug) = key.strip_prefix(WORKER_OVERRIDE_PREFIX) else {
                continue;
            };
            let slug = slug.to_ascii_lowercase();
            for worker in self.mock_workers.iter_mut().filter(|w| w.slug == slug) {
                worker.endpoint = value.clone();
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.prober.interval_secs == 0 || self.prober.timeout_secs == 0 {
            return Err(InfraZeroError::config("Prober interval and timeout must be non-zero"));
        }
        if self.dispatch.fan_out_timeout_secs == 0 || self.dispatch.single_best_timeout_secs == 0 {
            return Err(InfraZeroError::config("Dispatch timeouts must be non-zero"));
        }

        match self.mode {
            FleetMode::Mock => {
                if self.mock_workers.is_empty() {
                    return Err(InfraZeroError::config("Mock mode requires at least one mock worker"));
                }
                let mut seen = HashSet::new();
                for worker in &self.mock_workers {
                    if !seen.insert(worker.id.as_str()) {
                        return Err(InfraZeroError::config(format!("Duplicate mock worker id: {}", worker.id)));
                    }
                }
            }
            FleetMode::Live => {
                if self.provisioning.api_key.is_empty() {
                    return Err(InfraZeroError::config("Live mode requires VULTR_API_KEY"));
                }
            }
        }
        Ok(())
    }

    /// Get probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.prober.interval_secs)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.prober.timeout_secs)
    }

}
