//! Lease store abstraction and backends.
//!
//! A lease is the existence of a slot key together with its remaining TTL.
//! Mutual exclusion between processes rests entirely on the atomicity of
//! [`LeaseStore::acquire`]; neither the allocator nor the renewer ever
//! read-then-write a slot outside of these primitives.
//!
//! ## Backends
//!
//! - [`InMemoryLeaseStore`] - process-local store on the tokio clock. Used by
//!   tests and single-process deployments.
//! - [`RedisLeaseStore`] - shared Redis store (feature `redis`).

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::*;
#[cfg(feature = "redis")]
pub use self::redis::*;

use crate::{Error, Result, StoreOp};
use async_trait::async_trait;
use core::{future::Future, time::Duration};

/// A shared, TTL-capable key-value store used as a leasing authority.
///
/// All operations are network round trips in real deployments and must be
/// safe to call concurrently from unrelated processes. Failure to reach the
/// store is reported as [`Error::StoreUnavailable`].
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomically creates `key` with value `holder` and expiry `ttl` if it
    /// does not exist.
    ///
    /// Returns `true` if and only if this call created the key. An existing
    /// key is left untouched, whoever holds it.
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Returns the holder marker stored under `key`, or `None` if the key
    /// does not exist.
    async fn current_holder(&self, key: &str) -> Result<Option<String>>;

    /// Sets a fresh expiry of `ttl` on `key`, whatever its value.
    ///
    /// Returns `false` if the key no longer exists. Idempotent.
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` if it still carries `holder`.
    ///
    /// Returns `true` if the key was deleted.
    async fn release(&self, key: &str, holder: &str) -> Result<bool>;
}

/// Runs a store operation, converting an elapsed `timeout` into
/// [`Error::StoreUnavailable`].
pub(crate) async fn with_timeout<T>(
    op: StoreOp,
    key: &str,
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::unavailable(op, key, format!("timed out after {limit:?}")))?,
        None => fut.await,
    }
}
