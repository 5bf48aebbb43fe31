//! Health probing and monitoring
//!
//! Readiness probes gate startup; the monitor aggregates health
//! across all services for the lifetime of the supervisor.

mod monitor;
mod probe;

pub use monitor::*;
pub use probe::*;
