//! Configuration management for the cluster gateway.
//!
//! Provides environment detection, layered configuration loading from YAML files and
//! environment variables, secret handling, and the configuration types shared by the
//! gateway services.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
