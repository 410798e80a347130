//! capgrid-placement — where work can run, and how many nodes there are.
//!
//! This crate answers "does this unit of work fit on that node" and owns
//! every read and write against the fleet's size. It does NOT decide how
//! much capacity is needed (that's `capgrid-autoscale`).
//!
//! # Components
//!
//! - **`fit`** — [`NodeResources`], [`WorkloadDemand`] and the [`fits`] check
//! - **`convert`** — node and task-definition conversions into the fit model
//! - **`instance_types`** — static memory/vCPU table per instance type
//! - **`resource`** — [`ResourceManager`]: node listing, new-node estimates, `scale_to`

pub mod convert;
pub mod error;
pub mod fit;
pub mod instance_types;
pub mod resource;

pub use convert::{instance_to_resources, task_definition_to_demand};
pub use error::{ResourceError, ResourceResult};
pub use fit::{NodeResources, WorkloadDemand, fits, mib_to_bytes};
pub use instance_types::{InstanceSpec, instance_spec};
pub use resource::ResourceManager;
