//! InfraZero Coordinator
//!
//! Control plane that tracks regional workers, probes their health and routes
//! inference requests to the best available worker(s).

pub mod api;
pub mod dispatcher;
pub mod fleet;
pub mod prober;
pub mod provisioner;
pub mod registry;
pub mod worker_client;

pub use api::AppState;
pub use dispatcher::Dispatcher;
pub use fleet::FleetController;
pub use prober::HealthProber;
pub use provisioner::{Provisioner, VultrClient};
pub use registry::{Registry, WorkerPatch};
pub use worker_client::{HttpWorkerClient, WorkerTransport};
