use crate::{Error, Result, RetryPolicy, SLOT_COUNT};
use core::time::Duration;

/// Key namespace for slot leases. The slot index is appended verbatim.
pub const DEFAULT_KEY_PREFIX: &str = "sys:tsid:node:";

/// Time-to-live of a freshly acquired or renewed lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Period between two heartbeat renewals.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Upper bound for a single round trip to the store.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Order in which the allocator scans slots.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanOrder {
    /// Try `0, 1, ..., N-1`. Lowest free slot wins.
    #[default]
    Ascending,
    /// Try all slots in ascending, wrap-around order starting at a random
    /// slot. Spreads contention when many processes start at once.
    RandomOffset,
}

/// Tunables for slot allocation and lease renewal.
///
/// [`LeaseConfig::default`] reproduces the production layout: 1024 slots
/// under `sys:tsid:node:`, a 24h lease renewed every 12h.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseConfig {
    /// Prefix prepended to every slot index to form its store key.
    pub key_prefix: String,

    /// Number of slots to scan, `[0, slots)`. At most [`SLOT_COUNT`].
    pub slots: u16,

    /// TTL set on acquire and on every renewal.
    pub lease_ttl: Duration,

    /// Period of the heartbeat renewer. Must be at most half of `lease_ttl`.
    pub heartbeat_interval: Duration,

    /// Timeout applied to each store round trip. `None` waits indefinitely.
    pub op_timeout: Option<Duration>,

    /// Slot scanning order.
    pub scan_order: ScanOrder,

    /// Retries of a single slot while the store is unavailable.
    pub acquire_retry: RetryPolicy,

    /// Retries of the full scan after every slot was found taken.
    pub exhaustion_retry: RetryPolicy,

    /// Backoff between failed renewals. Retries stop when the lease's TTL
    /// window closes, so `max_attempts` is ignored here.
    pub renew_retry: RetryPolicy,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            slots: SLOT_COUNT,
            lease_ttl: DEFAULT_LEASE_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            op_timeout: Some(DEFAULT_OP_TIMEOUT),
            scan_order: ScanOrder::Ascending,
            acquire_retry: RetryPolicy::default(),
            exhaustion_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(10),
                multiplier: 2.0,
                jitter: 0.5,
            },
            renew_retry: RetryPolicy {
                max_attempts: u32::MAX,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(5 * 60),
                multiplier: 2.0,
                jitter: 0.25,
            },
        }
    }
}

impl LeaseConfig {
    /// Returns the store key for `slot`.
    pub fn slot_key(&self, slot: u16) -> String {
        format!("{}{slot}", self.key_prefix)
    }

    /// Checks the invariants the allocator and renewer rely on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::invalid_config("key_prefix must not be empty"));
        }
        if self.slots == 0 || self.slots > SLOT_COUNT {
            return Err(Error::invalid_config(format!(
                "slots ({}) must be within 1..={SLOT_COUNT}",
                self.slots
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::invalid_config(
                "heartbeat_interval must be greater than 0",
            ));
        }
        // A single missed heartbeat must not let the lease expire.
        if self.lease_ttl < self.heartbeat_interval.saturating_mul(2) {
            return Err(Error::invalid_config(format!(
                "lease_ttl ({:?}) must be at least twice heartbeat_interval ({:?})",
                self.lease_ttl, self.heartbeat_interval
            )));
        }
        if self.op_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_config("op_timeout must be greater than 0"));
        }
        self.acquire_retry.validate("acquire_retry")?;
        self.exhaustion_retry.validate("exhaustion_retry")?;
        self.renew_retry.validate("renew_retry")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LeaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slots, 1024);
        assert_eq!(config.lease_ttl, Duration::from_secs(86_400));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(43_200));
        assert_eq!(config.scan_order, ScanOrder::Ascending);
    }

    #[test]
    fn slot_keys_use_prefix() {
        let config = LeaseConfig::default();
        assert_eq!(config.slot_key(0), "sys:tsid:node:0");
        assert_eq!(config.slot_key(1023), "sys:tsid:node:1023");
    }

    #[test]
    fn ttl_must_cover_two_heartbeats() {
        let config = LeaseConfig {
            lease_ttl: Duration::from_secs(100),
            heartbeat_interval: Duration::from_secs(51),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));

        let config = LeaseConfig {
            heartbeat_interval: Duration::from_secs(50),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_slot_counts() {
        for slots in [0, SLOT_COUNT + 1] {
            let config = LeaseConfig {
                slots,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "slots = {slots}");
        }
    }

    #[test]
    fn rejects_empty_strings_and_zero_durations() {
        let base = LeaseConfig::default();
        let cases = [
            LeaseConfig {
                key_prefix: String::new(),
                ..base.clone()
            },
            LeaseConfig {
                heartbeat_interval: Duration::ZERO,
                ..base.clone()
            },
            LeaseConfig {
                op_timeout: Some(Duration::ZERO),
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
