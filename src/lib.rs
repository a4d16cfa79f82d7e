//! # u-spc
//!
//! Real-time statistical process control over named metric streams.
//!
//! Each metric owns one control chart. Charts estimate their control limits
//! (or baseline) from a warm-up window, then evaluate every new point with
//! the eight Western Electric rules and report violations with a severity
//! and a recommended action.
//!
//! ## Modules
//!
//! - [`spc`] — Chart types, control limit math, Western Electric rules, X̄-R and p charts
//! - [`detection`] — Shift detection charts (CUSUM, EWMA)
//! - [`registry`] — Thread-safe metric → chart map with payload routing and fleet status
//! - [`config`] — Serde/TOML chart and registry configuration
//! - [`events`] — Violation sinks
//! - [`window`] — Bounded FIFO windows backing every chart
//! - [`error`] — Error type shared by the crate
//!
//! ## Design Philosophy
//!
//! - **Bounded memory**: windows and violation logs are fixed-capacity FIFOs
//! - **No silent failure**: bad input is rejected with an error and leaves the chart untouched
//! - **Research-backed**: constants and limits follow Montgomery and ASTM E2587

pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod registry;
pub mod spc;
pub mod window;

pub use config::{ChartConfig, ChartSettings, ChartSpec, RegistryConfig};
pub use error::SpcError;
pub use events::{ViolationEvent, ViolationSink};
pub use registry::{Chart, ChartRegistry, OverallStatus, Payload, ProcessState};
