//! Runtime glue that wires configuration, telemetry, the assembled pipeline and
//! the daily scheduler.

pub mod config;
pub mod pipeline;
pub mod runner;
pub mod telemetry;
