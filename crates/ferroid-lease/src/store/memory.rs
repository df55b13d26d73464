use crate::{Error, LeaseStore, Result, StoreOp};
use async_trait::async_trait;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// A process-local [`LeaseStore`].
///
/// Expiry is measured on the tokio clock, so tests running with a paused
/// runtime can simulate hours of lease time. The store can also be made
/// unavailable, or told to fail the next `n` calls, to exercise the retry
/// paths of the allocator and the renewer.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    unavailable: bool,
    fail_next: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    holder: String,
    expires_at: Instant,
}

impl Inner {
    fn check(&mut self, op: StoreOp, key: &str) -> Result<()> {
        if self.unavailable {
            return Err(Error::unavailable(op, key, "store is unavailable"));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(Error::unavailable(op, key, "injected failure"));
        }
        Ok(())
    }

    /// Returns the live entry for `key`, dropping it if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| e.expires_at <= now) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again) with
    /// [`Error::StoreUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.inner.lock().unavailable = !available;
    }

    /// Fails the next `n` calls with [`Error::StoreUnavailable`].
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Drops every lease, as a store restart without persistence would.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Returns the remaining TTL of `key`, or `None` if it is not leased.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.live(key, now).map(|e| e.expires_at - now)
    }

    /// Returns the holder marker stored under `key`, if it is leased.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.live(key, now).map(|e| e.holder.clone())
    }

    /// Returns the number of live leases.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Acquire, key)?;

        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn current_holder(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Lookup, key)?;
        Ok(inner.live(key, now).map(|e| e.holder.clone()))
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Renew, key)?;

        match inner.live(key, now) {
            Some(entry) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Release, key)?;

        let owned = inner.live(key, now).is_some_and(|e| e.holder == holder);
        if owned {
            inner.entries.remove(key);
        }
        Ok(owned)
    }
}
