//! Bootstrap pieces of the node binary.
//!
//! - [`config`] - CLI/env parsing into a validated [`config::NodeConfig`].
//! - [`telemetry`] - `tracing-subscriber` setup.

pub mod config;
pub mod telemetry;
