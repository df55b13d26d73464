//! Slot scanning and lease ownership.
//!
//! A [`NodeAllocator`] walks the slot space once per attempt and takes the
//! first slot whose key it can atomically create in the [`LeaseStore`]. The
//! resulting [`NodeLease`] owns the heartbeat that keeps the slot alive.

use crate::{
    Backoff, Error, HeartbeatHandle, HeartbeatRenewer, LeaseConfig, LeaseState, LeaseStore,
    NodeId, Result, ScanOrder, StoreOp, store::with_timeout,
};
use core::{fmt, time::Duration};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Hands out at most one node ID for the lifetime of the allocator.
///
/// Concurrent callers on the same allocator are serialized; the first to
/// succeed wins and later calls fail with [`Error::AlreadyAllocated`].
/// Exclusion between allocators (and processes) is provided by the store.
///
/// Every allocator draws its own random holder marker, so allocators built
/// from clones of one [`LeaseConfig`] still never share a slot.
pub struct NodeAllocator {
    store: Arc<dyn LeaseStore>,
    config: LeaseConfig,
    holder: String,
    allocated: Mutex<Option<NodeId>>,
}

impl NodeAllocator {
    /// Creates an allocator over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails
    /// [`LeaseConfig::validate`].
    pub fn new(store: Arc<dyn LeaseStore>, config: LeaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            holder: format!("{:016x}", rand::rng().random::<u64>()),
            allocated: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// The marker this allocator writes as the value of the slot it takes.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Acquires a free slot and starts renewing it.
    ///
    /// The heartbeat is running before this returns, so the lease is already
    /// being kept alive when the caller first sees the node ID.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeSpaceExhausted`] if every slot stayed taken across all
    ///   scan attempts.
    /// - [`Error::StoreUnavailable`] if a slot could not be tried after
    ///   exhausting its retries. Unreachability is never reported as
    ///   exhaustion.
    /// - [`Error::AlreadyAllocated`] if this allocator already succeeded.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(holder = %self.holder)))]
    pub async fn acquire_node_id(&self) -> Result<NodeLease> {
        let mut allocated = self.allocated.lock().await;
        if let Some(node_id) = *allocated {
            return Err(Error::AlreadyAllocated { node_id });
        }

        let mut backoff = Backoff::new(&self.config.exhaustion_retry);
        let node_id = loop {
            if let Some(node_id) = self.scan().await? {
                break node_id;
            }
            let Some(delay) = backoff.next_delay() else {
                return Err(Error::NodeSpaceExhausted {
                    slots: self.config.slots,
                });
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(retry_in = ?delay, "All slots leased, rescanning");
            tokio::time::sleep(delay).await;
        };

        let key = self.config.slot_key(node_id.get());
        let heartbeat = HeartbeatRenewer::new(
            self.store.clone(),
            key.clone(),
            self.holder.clone(),
            self.config.lease_ttl,
            self.config.heartbeat_interval,
        )
        .with_op_timeout(self.config.op_timeout)
        .with_retry(self.config.renew_retry.clone())
        .spawn();

        *allocated = Some(node_id);

        #[cfg(feature = "tracing")]
        tracing::info!(%node_id, %key, "Node ID acquired");

        Ok(NodeLease {
            node_id,
            key,
            holder: self.holder.clone(),
            store: self.store.clone(),
            op_timeout: self.config.op_timeout,
            heartbeat,
        })
    }

    /// One pass over the slot space. Returns the first slot acquired.
    async fn scan(&self) -> Result<Option<NodeId>> {
        let slots = self.config.slots;
        let start = match self.config.scan_order {
            ScanOrder::Ascending => 0,
            ScanOrder::RandomOffset => rand::rng().random_range(0..slots),
        };

        for i in 0..slots {
            let slot = (start + i) % slots;
            if self.try_slot(slot).await? {
                return Ok(NodeId::new(slot));
            }
        }
        Ok(None)
    }

    /// Tries to create the key of `slot`, retrying while the store is
    /// unavailable.
    ///
    /// A failed or timed-out attempt may still have created the key. Once
    /// that has happened, a later refusal is checked against the stored
    /// holder so the allocator does not strand its own lease.
    async fn try_slot(&self, slot: u16) -> Result<bool> {
        let key = self.config.slot_key(slot);
        let mut backoff = Backoff::new(&self.config.acquire_retry);
        let mut ambiguous = false;

        loop {
            let attempt = match self.acquire_once(&key).await {
                Ok(true) => return Ok(true),
                Ok(false) if !ambiguous => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%key, "Slot busy");
                    return Ok(false);
                }
                Ok(false) => self.owns(&key).await,
                Err(e) => Err(e),
            };

            let e = match attempt {
                Ok(owned) => {
                    #[cfg(feature = "tracing")]
                    if owned {
                        tracing::debug!(%key, "Earlier unanswered acquire had created the key");
                    }
                    return Ok(owned);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            ambiguous = true;

            let Some(delay) = backoff.next_delay() else {
                return Err(e);
            };
            #[cfg(feature = "tracing")]
            tracing::warn!(%key, retry_in = ?delay, error = %e, "Acquire failed");
            tokio::time::sleep(delay).await;
        }
    }

    async fn acquire_once(&self, key: &str) -> Result<bool> {
        with_timeout(
            StoreOp::Acquire,
            key,
            self.config.op_timeout,
            self.store.acquire(key, &self.holder, self.config.lease_ttl),
        )
        .await
    }

    /// Returns `true` if `key` carries this allocator's holder marker.
    async fn owns(&self, key: &str) -> Result<bool> {
        let holder = with_timeout(
            StoreOp::Lookup,
            key,
            self.config.op_timeout,
            self.store.current_holder(key),
        )
        .await?;
        Ok(holder.as_deref() == Some(self.holder.as_str()))
    }
}

impl fmt::Debug for NodeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeAllocator")
            .field("config", &self.config)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// A held slot: the node ID plus the heartbeat keeping it alive.
///
/// The node ID may be used for as long as [`state`](Self::state) is
/// [`LeaseState::Held`]. Dropping the lease stops the heartbeat without
/// releasing the key, which then expires at its current TTL.
pub struct NodeLease {
    node_id: NodeId,
    key: String,
    holder: String,
    store: Arc<dyn LeaseStore>,
    op_timeout: Option<Duration>,
    heartbeat: HeartbeatHandle,
}

impl NodeLease {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The store key of the held slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> LeaseState {
        self.heartbeat.state()
    }

    /// Returns a receiver notified when the lease is lost or stopped.
    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.heartbeat.subscribe()
    }

    /// Stops renewing and deletes the slot key so it can be reused right
    /// away.
    ///
    /// The key is only deleted if it still carries this lease's holder
    /// marker.
    ///
    /// # Errors
    ///
    /// - [`Error::LeaseLost`] if the lease had already been lost, or the key
    ///   had expired or changed hands before the delete.
    /// - [`Error::StoreUnavailable`] if the store could not be reached. The
    ///   key then expires at its current TTL.
    pub async fn release(self) -> Result<()> {
        let Self {
            node_id: _node_id,
            key,
            holder,
            store,
            op_timeout,
            heartbeat,
        } = self;

        if heartbeat.stop().await == LeaseState::Lost {
            return Err(Error::LeaseLost { key });
        }

        let released = with_timeout(
            StoreOp::Release,
            &key,
            op_timeout,
            store.release(&key, &holder),
        )
        .await?;
        if !released {
            return Err(Error::LeaseLost { key });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(node_id = %_node_id, %key, "Node ID released");
        Ok(())
    }

    /// Stops renewing without touching the key. Returns the final state.
    pub async fn stop(self) -> LeaseState {
        self.heartbeat.stop().await
    }
}

impl fmt::Debug for NodeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLease")
            .field("node_id", &self.node_id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
