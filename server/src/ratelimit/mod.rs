//! Adaptive admission control.
//!
//! Tracks per-caller, per-route-group request timing in memory, detects
//! synchronized bursts from inter-arrival statistics, and throttles them with
//! separate enter/exit thresholds and an adaptive per-key capacity.

pub mod audit;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod ip;
pub mod janitor;
pub mod middleware;
pub mod params;
pub mod state;
pub mod stats;
pub mod types;

pub use audit::*;
pub use config::*;
pub use constants::*;
pub use controller::*;
pub use error::*;
pub use ip::*;
pub use janitor::*;
pub use middleware::admission_gate;
pub use params::*;
pub use state::*;
pub use stats::Features;
pub use types::*;
