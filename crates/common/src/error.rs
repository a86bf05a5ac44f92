//! Common error types for InfraZero
//!
//! This module defines all error types used across the control plane and workers.
//! Errors that reach the HTTP layer are mapped to status codes via [`InfraZeroError::status_code`].
//! Per-worker probe and inference failures are not surfaced this way; they are
//! absorbed into registry state and soft-error response bodies.

use thiserror::Error;

/// Main error type for InfraZero
#[derive(Error, Debug)]
pub enum InfraZeroError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Worker answered but the answer is unusable
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Selection found no routable worker
    #[error("No eligible workers: {0}")]
    NoEligibleWorkers(String),

    /// Cloud provisioning client failed
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InfraZeroError {
    /// HTTP status code used when this error reaches a control-plane caller
    pub fn status_code(&self) -> u16 {
        match self {
            InfraZeroError::InvalidInput(_) | InfraZeroError::Serialization(_) => 400,
            InfraZeroError::Provisioning(_) => 502,
            InfraZeroError::Connection(_)
            | InfraZeroError::Timeout(_)
            | InfraZeroError::WorkerUnavailable(_)
            | InfraZeroError::NoEligibleWorkers(_)
            | InfraZeroError::Http(_) => 503,
            InfraZeroError::Config(_) | InfraZeroError::Io(_) | InfraZeroError::Internal(_) => 500,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        InfraZeroError::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        InfraZeroError::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        InfraZeroError::Timeout(msg.into())
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(msg: impl Into<String>) -> Self {
        InfraZeroError::WorkerUnavailable(msg.into())
    }

    /// Create a no eligible workers error
    pub fn no_eligible_workers(msg: impl Into<String>) -> Self {
        InfraZeroError::NoEligibleWorkers(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        InfraZeroError::Provisioning(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        InfraZeroError::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        InfraZeroError::Internal(msg.into())
    }
}

/// Result type alias for InfraZero operations
pub type Result<T> = std::result::Result<T, InfraZeroError>;
