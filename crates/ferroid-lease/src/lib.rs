#![doc = include_str!("../README.md")]

mod allocator;
mod config;
mod error;
mod factory;
mod heartbeat;
mod retry;
mod store;
#[cfg(test)]
mod tests;
mod types;

pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::factory::*;
pub use crate::heartbeat::*;
pub use crate::retry::{Backoff, RetryPolicy};
pub use crate::store::*;
pub use crate::types::*;
// Re-exported so callers can name generator types without a direct
// dependency.
pub use ferroid;
