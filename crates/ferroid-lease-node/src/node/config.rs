use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use ferroid_lease::{DEFAULT_KEY_PREFIX, LeaseConfig, RetryPolicy, ScanOrder};

/// Runtime configuration for the `ferroid-lease-node` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first). The defaults lease one of 1024 slots for 24
/// hours and renew it every 12 hours.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferroid-lease-node",
    version,
    about = "Lease a Snowflake node ID from Redis and hold it for the process lifetime"
)]
pub struct CliArgs {
    /// Connection URL of the Redis instance used as the leasing authority.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://127.0.0.1:6379/"))]
    pub redis_url: String,

    /// Namespace prefix of the slot keys. The slot index is appended.
    ///
    /// Environment variable: `NODE_KEY_PREFIX`
    #[arg(long, env = "NODE_KEY_PREFIX", default_value_t = String::from(DEFAULT_KEY_PREFIX))]
    pub key_prefix: String,

    /// Lease time-to-live in seconds.
    ///
    /// Environment variable: `LEASE_TTL_SECS`
    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = 24 * 60 * 60)]
    pub lease_ttl_secs: u64,

    /// Heartbeat period in seconds. Must be at most half of the lease TTL.
    ///
    /// Environment variable: `HEARTBEAT_SECS`
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = 12 * 60 * 60)]
    pub heartbeat_secs: u64,

    /// Timeout of a single Redis round trip in milliseconds. `0` disables the
    /// timeout.
    ///
    /// Environment variable: `STORE_OP_TIMEOUT_MS`
    #[arg(long, env = "STORE_OP_TIMEOUT_MS", default_value_t = 5_000)]
    pub op_timeout_ms: u64,

    /// Order in which slots are scanned.
    ///
    /// Environment variable: `SCAN_ORDER`
    #[arg(long, env = "SCAN_ORDER", value_enum, default_value_t = CliScanOrder::Ascending)]
    pub scan_order: CliScanOrder,

    /// Number of full scans before giving up when every slot is taken.
    ///
    /// Environment variable: `EXHAUSTION_ATTEMPTS`
    #[arg(long, env = "EXHAUSTION_ATTEMPTS", default_value_t = 3)]
    pub exhaustion_attempts: u32,

    /// Leave the slot key in place on shutdown and let it expire.
    ///
    /// Environment variable: `NO_RELEASE_ON_SHUTDOWN`
    #[arg(long, env = "NO_RELEASE_ON_SHUTDOWN", default_value_t = false)]
    pub no_release: bool,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliScanOrder {
    Ascending,
    RandomOffset,
}

impl From<CliScanOrder> for ScanOrder {
    fn from(order: CliScanOrder) -> Self {
        match order {
            CliScanOrder::Ascending => Self::Ascending,
            CliScanOrder::RandomOffset => Self::RandomOffset,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub redis_url: String,
    pub lease: LeaseConfig,
    pub release_on_shutdown: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.redis_url.is_empty() {
            bail!("REDIS_URL must not be empty");
        }
        if args.heartbeat_secs == 0 {
            bail!("HEARTBEAT_SECS must be greater than 0");
        }
        if args.exhaustion_attempts == 0 {
            bail!("EXHAUSTION_ATTEMPTS must be greater than 0");
        }

        let defaults = LeaseConfig::default();
        let lease = LeaseConfig {
            key_prefix: args.key_prefix,
            lease_ttl: Duration::from_secs(args.lease_ttl_secs),
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
            op_timeout: (args.op_timeout_ms > 0)
                .then(|| Duration::from_millis(args.op_timeout_ms)),
            scan_order: args.scan_order.into(),
            exhaustion_retry: RetryPolicy {
                max_attempts: args.exhaustion_attempts,
                ..defaults.exhaustion_retry.clone()
            },
            ..defaults
        };
        lease.validate()?;

        Ok(Self {
            redis_url: args.redis_url,
            lease,
            release_on_shutdown: !args.no_release,
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<NodeConfig> {
        let argv = std::iter::once("ferroid-lease-node").chain(args.iter().copied());
        NodeConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = parse(&[]).unwrap();
        let defaults = LeaseConfig::default();
        assert_eq!(config.lease.key_prefix, defaults.key_prefix);
        assert_eq!(config.lease.lease_ttl, defaults.lease_ttl);
        assert_eq!(config.lease.heartbeat_interval, defaults.heartbeat_interval);
        assert_eq!(config.lease.op_timeout, defaults.op_timeout);
        assert!(config.release_on_shutdown);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--scan-order",
            "random-offset",
            "--op-timeout-ms",
            "0",
            "--no-release",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.lease.scan_order, ScanOrder::RandomOffset);
        assert_eq!(config.lease.op_timeout, None);
        assert!(!config.release_on_shutdown);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_heartbeat_longer_than_half_ttl() {
        let err = parse(&["--lease-ttl-secs", "100", "--heartbeat-secs", "60"]).unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval"), "{err}");
    }

    #[test]
    fn rejects_zero_values() {
        assert!(parse(&["--heartbeat-secs", "0"]).is_err());
        assert!(parse(&["--exhaustion-attempts", "0"]).is_err());
        assert!(parse(&["--redis-url", ""]).is_err());
    }
}
