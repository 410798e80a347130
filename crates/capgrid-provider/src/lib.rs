//! capgrid-provider — the services the control plane sits on top of.
//!
//! - **`api`** — async traits for the orchestration service, the fleet
//!   manager and the workload registry
//! - **`types`** — the shapes those services exchange
//! - **`error`** — [`ProviderError`] and its classification helpers
//! - **`memory`** — [`MemoryCloud`], an in-process implementation of all
//!   three traits used by tests and the daemon's simulation mode

pub mod api;
pub mod error;
pub mod memory;
pub mod types;

pub use api::{FleetManager, OrchestrationApi, WorkloadRegistry};
pub use error::{NO_CONTAINER_INSTANCES_MSG, ProviderError, ProviderResult};
pub use memory::{FleetCall, MemoryCloud, Operation};
pub use types::*;
