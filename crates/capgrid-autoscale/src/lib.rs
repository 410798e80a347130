//! capgrid-autoscale — how much compute an environment should have.
//!
//! # Components
//!
//! - **`scaler`** — [`ClusterScaler`]: counts demand that fits no node and
//!   grows the group to cover it. Never shrinks.
//! - **`environment`** — [`EnvironmentScaler`]: a full bin-packing run that
//!   sizes the group to exactly the nodes in use.
//! - **`right_sizer`** — [`RightSizer`]: the hourly sweep that replaces
//!   lost nodes and gives idle ones back, with a liveness check.
//! - **`dispatcher`** — [`ScalerDispatcher`]: debounced, per-environment
//!   environment scaler runs plus a periodic run for every environment.
//!
//! # Scale-up estimate
//!
//! ```text
//! demand  = primary deployment shortfalls
//!         + capacity-waiting one-off copies (fleet-wide)
//!         + new workload × count
//! missing = units of demand that fit no current node
//! total   = nodes + missing
//! if missing > 0 and total > desired:
//!     group.max     = max(group.max, total)
//!     group.desired = total
//! ```

pub mod demand;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod right_sizer;
pub mod scaler;

pub use demand::{CopyScope, PendingDemand, collect_pending_demand};
pub use dispatcher::ScalerDispatcher;
pub use environment::{EnvironmentScaler, ScalerRunInfo};
pub use error::{ScaleError, ScaleResult};
pub use right_sizer::{EnvironmentSweep, RightSizer};
pub use scaler::{ClusterScaler, ScalingOutcome};
