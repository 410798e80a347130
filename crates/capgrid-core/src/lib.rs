//! capgrid-core — shared plumbing for the capgrid control plane.
//!
//! - **`config`** — `capgrid.toml` parsing and resolved [`Settings`]
//! - **`clock`** — the [`Clock`] trait with real and manual implementations
//! - **`waiter`** — bounded fixed-delay polling on top of a clock

pub mod clock;
pub mod config;
pub mod waiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CapgridConfig, Settings};
pub use waiter::{WaitError, Waiter};
