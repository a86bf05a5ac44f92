//! InfraZero common library
//!
//! This crate contains shared code used by the control plane and the stub worker.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{ControlPlaneConfig, DispatchMode, FleetMode};
pub use error::{InfraZeroError, Result};
pub use metrics::{MetricsRegistry, METRICS};
