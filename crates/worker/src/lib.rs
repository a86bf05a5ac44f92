//! InfraZero Worker
//!
//! Stub regional worker implementing the two-endpoint worker contract
//! (`GET /health`, `POST /infer`) so a local fleet can be run in mock mode.

pub mod service;

pub use service::{router, Engine, WorkerSettings};
