//! Logging and metrics setup shared by the gateway binaries.

pub mod metrics;
pub mod tracing;
