//! # Node ID Types and Constants
//!
//! This module defines the slot space shared between the allocator and the
//! Snowflake generator that consumes the allocated ID.
//!
//! ## Constants
//!
//! - [`NODE_ID_BITS`] - Width of the machine ID field in the generator layout
//! - [`SLOT_COUNT`] - Number of allocatable slots (`1 << NODE_ID_BITS`)
//!
//! Both the allocator's scan range and the factory's range check derive from
//! these two constants. Do not restate the slot count elsewhere.

use core::fmt;
use ferroid::id::SnowflakeTwitterId;

/// Number of bits reserved for the machine ID in the generated identifiers.
///
/// Read from the machine ID field of [`SnowflakeTwitterId`], so the slot
/// space follows the generator layout.
pub const NODE_ID_BITS: u32 = SnowflakeTwitterId::MACHINE_ID_BITS as u32;

/// The fixed number of allocatable slots, `[0, SLOT_COUNT)`.
pub const SLOT_COUNT: u16 = 1 << NODE_ID_BITS;

/// A node ID obtained from a successfully leased slot.
///
/// The wrapped value is always in `[0, SLOT_COUNT)`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

impl NodeId {
    /// The highest node ID in the slot space.
    pub const MAX: Self = Self(SLOT_COUNT - 1);

    /// Returns a node ID for `slot`, or `None` if it lies outside the slot
    /// space.
    pub const fn new(slot: u16) -> Option<Self> {
        if slot < SLOT_COUNT {
            Some(Self(slot))
        } else {
            None
        }
    }

    /// Returns the raw slot index.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<NodeId> for u16 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        Self::from(id.0)
    }
}

impl TryFrom<u16> for NodeId {
    type Error = crate::Error;

    fn try_from(slot: u16) -> Result<Self, Self::Error> {
        Self::new(slot).ok_or(crate::Error::NodeIdOutOfRange {
            node_id: u64::from(slot),
            max: u64::from(Self::MAX.0),
        })
    }
}
