//! Background renewal of a held lease.
//!
//! The renewer is a tokio task owned by a [`HeartbeatHandle`]. It fires on a
//! fixed period and extends the lease TTL on every tick. A failed renewal is
//! retried with backoff for as long as the lease can still be alive (last
//! successful renewal + TTL); after that the lease is reported as
//! [`LeaseState::Lost`] and the task exits.
//!
//! Cancellation goes through a [`CancellationToken`]. Dropping the handle
//! cancels the task, so a renewer never outlives its owner.

use crate::{
    Backoff, LeaseStore, RetryPolicy, StoreOp,
    retry::sleep_or_cancel,
    store::with_timeout,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a lease as seen by its renewer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaseState {
    /// The lease is held and being renewed.
    Held,
    /// The lease expired or was taken over. The node ID must no longer be
    /// used.
    Lost,
    /// The renewer was stopped. The lease runs out at its current TTL unless
    /// it was released.
    Stopped,
}

/// Outcome of one renewal round. Success carries the instant the winning
/// request was sent, which bounds how long ago the store last set the TTL.
enum Renewal {
    Renewed(Instant),
    Reclaimed(Instant),
    Lost,
    Cancelled,
}

/// Periodically renews one slot key.
pub struct HeartbeatRenewer {
    store: Arc<dyn LeaseStore>,
    key: String,
    holder: String,
    lease_ttl: Duration,
    interval: Duration,
    op_timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl HeartbeatRenewer {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        key: impl Into<String>,
        holder: impl Into<String>,
        lease_ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            holder: holder.into(),
            lease_ttl,
            interval,
            op_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Bounds every store call made by the renewer.
    #[must_use]
    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Sets the backoff used between failed renewals.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Starts the renewer on the current tokio runtime.
    ///
    /// The first renewal happens one `interval` after this call, so it must
    /// be made right after the lease was acquired.
    pub fn spawn(self) -> HeartbeatHandle {
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(LeaseState::Held);
        let join = tokio::spawn(self.run(token.clone(), state_tx));

        HeartbeatHandle {
            token,
            join: Some(join),
            state: state_rx,
        }
    }

    async fn run(self, token: CancellationToken, state: watch::Sender<LeaseState>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, interval = ?self.interval, "Heartbeat started");

        let mut last_renewed = Instant::now();
        let mut ticker = interval_at(last_renewed + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.renew_within(last_renewed + self.lease_ttl, &token).await {
                Renewal::Renewed(sent) => {
                    last_renewed = sent;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = %self.key, "Lease renewed");
                }
                Renewal::Reclaimed(sent) => {
                    last_renewed = sent;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key = %self.key, "Lease key had vanished and was re-created");
                }
                Renewal::Lost => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(key = %self.key, "Lease lost, node ID must not be used");
                    state.send_replace(LeaseState::Lost);
                    return;
                }
                Renewal::Cancelled => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, "Heartbeat stopped");
        state.send_replace(LeaseState::Stopped);
    }

    /// Renews the lease, retrying until `deadline`, when the lease would have
    /// expired in the store.
    async fn renew_within(&self, deadline: Instant, token: &CancellationToken) -> Renewal {
        let mut backoff = Backoff::unbounded(&self.retry);

        loop {
            let sent = Instant::now();
            let renewed = with_timeout(
                StoreOp::Renew,
                &self.key,
                self.op_timeout,
                self.store.renew(&self.key, self.lease_ttl),
            )
            .await;

            let _err = match renewed {
                Ok(true) => return Renewal::Renewed(sent),
                // The key is gone: re-create it unless someone else got there
                // first.
                Ok(false) => {
                    let sent = Instant::now();
                    match with_timeout(
                        StoreOp::Acquire,
                        &self.key,
                        self.op_timeout,
                        self.store.acquire(&self.key, &self.holder, self.lease_ttl),
                    )
                    .await
                    {
                        Ok(true) => return Renewal::Reclaimed(sent),
                        Ok(false) => return Renewal::Lost,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            let Some(delay) = backoff.next_delay() else {
                return Renewal::Lost;
            };
            if Instant::now() + delay >= deadline {
                return Renewal::Lost;
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(key = %self.key, retry_in = ?delay, error = %_err, "Renewal failed");

            if !sleep_or_cancel(token, delay).await {
                return Renewal::Cancelled;
            }
        }
    }
}

/// Owner of a running [`HeartbeatRenewer`].
///
/// Dropping the handle cancels the renewer without waiting for it.
#[derive(Debug)]
pub struct HeartbeatHandle {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
    state: watch::Receiver<LeaseState>,
}

impl HeartbeatHandle {
    /// Returns the current lease state.
    pub fn state(&self) -> LeaseState {
        *self.state.borrow()
    }

    /// Returns a receiver notified on every lease state change.
    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.state.clone()
    }

    /// Returns `true` while the renewer task is alive.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Cancels the renewer and waits for it to exit. No renewal is issued
    /// after this returns.
    pub async fn stop(mut self) -> LeaseState {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(_e) = join.await {
                #[cfg(feature = "tracing")]
                tracing::error!("Heartbeat task failed: {_e}");
            }
        }
        *self.state.borrow()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
