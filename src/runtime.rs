//! Runtime glue that wires configuration, the environment-variable registry,
//! and telemetry.

pub mod config;
pub mod env;
pub mod telemetry;
