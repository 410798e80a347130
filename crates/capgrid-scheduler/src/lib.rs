//! capgrid-scheduler — getting one-off work placed when the cluster is full.
//!
//! # Components
//!
//! - **`scheduler`** — [`TaskScheduler`]: registry of capacity-blocked
//!   copies, each retried by its own background loop
//! - **`launcher`** — [`TaskLauncher`]: scale, run, and defer what did not fit
//! - **`registry`** — [`ScheduledWorkloads`]: a workload registry that
//!   includes the scheduler's waiting copies
//!
//! # Copy lifecycle
//!
//! ```text
//! add_task ──► retrying ──run_task ok──────────────► placed (removed)
//!                 │  ▲
//!                 │  └─ no capacity / failures, wait retry interval
//!                 ├─ other error ──► failed (kept, no more attempts)
//!                 ├─ delete_task ──► cancelled (removed)
//!                 └─ older than timeout ──► expired (removed by sweep)
//! ```

pub mod error;
pub mod launcher;
pub mod registry;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use launcher::TaskLauncher;
pub use registry::ScheduledWorkloads;
pub use scheduler::{TaskScheduler, failed_placeholder, pending_placeholder};
