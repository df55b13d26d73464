//! Glue between an allocated [`NodeId`] and the identifier generator that
//! embeds it.

use crate::{Error, NodeId, Result};
use ferroid::{
    generator::BasicSnowflakeGenerator,
    id::{SnowflakeId, SnowflakeTwitterId},
    time::{MonotonicClock, TWITTER_EPOCH},
};

/// Builds a process's identifier generator from its node ID.
///
/// The only guarantee handed to the generator is that no other live process
/// holds the same node ID while the lease is [`Held`](crate::LeaseState::Held).
pub trait IdGeneratorFactory {
    type Generator;

    /// # Errors
    ///
    /// Returns [`Error::NodeIdOutOfRange`] if `node_id` does not fit the
    /// generator's machine ID field.
    fn build(&self, node_id: NodeId) -> Result<Self::Generator>;
}

/// Generator produced by [`SnowflakeFactory`]: Twitter layout (41-bit
/// timestamp, 10-bit machine ID, 12-bit sequence) on a monotonic clock.
pub type SnowflakeGenerator = BasicSnowflakeGenerator<SnowflakeTwitterId, MonotonicClock>;

/// Builds [`SnowflakeGenerator`]s sharing one monotonic clock.
///
/// The generator is single-threaded. Build one per thread or task that needs
/// IDs; they all embed the same node ID and share the clock.
#[derive(Clone)]
pub struct SnowflakeFactory {
    clock: MonotonicClock,
}

impl SnowflakeFactory {
    pub fn new(clock: MonotonicClock) -> Self {
        Self { clock }
    }

    /// Largest node ID the generator layout can carry.
    pub fn max_node_id() -> u64 {
        <SnowflakeTwitterId as SnowflakeId>::max_machine_id()
    }
}

impl Default for SnowflakeFactory {
    fn default() -> Self {
        Self::new(MonotonicClock::with_epoch(TWITTER_EPOCH))
    }
}

impl IdGeneratorFactory for SnowflakeFactory {
    type Generator = SnowflakeGenerator;

    fn build(&self, node_id: NodeId) -> Result<Self::Generator> {
        let machine_id = u64::from(node_id);
        let max = Self::max_node_id();
        if machine_id > max {
            return Err(Error::NodeIdOutOfRange {
                node_id: machine_id,
                max,
            });
        }
        Ok(BasicSnowflakeGenerator::new(machine_id, self.clock.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NODE_ID_BITS, SLOT_COUNT};

    #[test]
    fn slot_space_matches_generator_layout() {
        assert_eq!(SnowflakeFactory::max_node_id() + 1, u64::from(SLOT_COUNT));
        assert_eq!(SnowflakeFactory::max_node_id(), (1 << NODE_ID_BITS) - 1);
    }

    #[test]
    fn ids_embed_node_id_and_increase() {
        let factory = SnowflakeFactory::default();
        let generator = factory.build(NodeId::MAX).unwrap();

        let mut last = generator.next_id(|_| std::thread::yield_now());
        assert_eq!(last.machine_id(), 1023);
        for _ in 0..1000 {
            let id = generator.next_id(|_| std::thread::yield_now());
            assert_eq!(id.machine_id(), 1023);
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn generators_share_the_clock() {
        let factory = SnowflakeFactory::default();
        let a = factory.build(NodeId::new(1).unwrap()).unwrap();
        let b = factory.build(NodeId::new(2).unwrap()).unwrap();

        let x = a.next_id(|_| std::thread::yield_now());
        let y = b.next_id(|_| std::thread::yield_now());
        assert_ne!(x, y);
        assert_eq!(x.machine_id(), 1);
        assert_eq!(y.machine_id(), 2);
    }
}
