//! Error types for node ID allocation.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the allocator, the heartbeat renewer and the store backends can report.
//!
//! ## Error Cases
//! - `NodeSpaceExhausted`: every slot is leased by another live holder.
//! - `StoreUnavailable`: the shared store could not be reached (or timed out).
//! - `AlreadyAllocated`: this allocator already handed out a node ID.
//! - `LeaseLost`: a held lease expired or was taken over by another holder.
//! - `NodeIdOutOfRange`: a node ID does not fit the generator's layout.
//! - `InvalidConfig`: a configuration value violates an invariant.

use crate::NodeId;
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// The store operation that was in flight when a failure occurred.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Acquire,
    Renew,
    Release,
    Lookup,
    Connect,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Acquire => "acquire",
            Self::Renew => "renew",
            Self::Release => "release",
            Self::Lookup => "lookup",
            Self::Connect => "connect",
        };
        f.write_str(op)
    }
}

/// Unified error type for node ID allocation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// All slots are currently leased by other (unexpired) holders.
    #[error("no node IDs available: all {slots} slots are leased")]
    NodeSpaceExhausted { slots: u16 },

    /// The shared store could not be reached.
    #[error("lease store unavailable during {op} of `{key}`: {reason}")]
    StoreUnavailable {
        op: StoreOp,
        key: String,
        reason: String,
    },

    /// The allocator already holds a node ID for this process.
    #[error("node ID {node_id} is already allocated to this process")]
    AlreadyAllocated { node_id: NodeId },

    /// The lease on `key` expired or is now held by someone else.
    #[error("lease on `{key}` was lost")]
    LeaseLost { key: String },

    /// The node ID does not fit the generator's machine ID field.
    #[error("node ID {node_id} exceeds the generator's machine ID range (max = {max})")]
    NodeIdOutOfRange { node_id: u64, max: u64 },

    /// A configuration value violates an invariant.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    pub(crate) fn unavailable(op: StoreOp, key: &str, reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            op,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the failure is transient and the operation may
    /// succeed when retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
