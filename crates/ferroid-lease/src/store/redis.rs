use crate::{Error, LeaseStore, Result, StoreOp};
use ::redis::{Client, Script, aio::ConnectionManager};
use async_trait::async_trait;
use core::time::Duration;

// Compare-and-delete on the holder marker.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// A [`LeaseStore`] backed by a shared Redis instance.
///
/// Uses a [`ConnectionManager`], which multiplexes requests over a single
/// connection and reconnects transparently. It is cheap to clone, so each
/// call works on its own handle.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    release: Script,
}

impl RedisLeaseStore {
    /// Connects to the Redis instance at `url` (e.g. `redis://127.0.0.1/`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the URL is invalid or the first
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        // URLs may embed credentials. Keep them out of errors.
        let client =
            Client::open(url).map_err(|e| Error::unavailable(StoreOp::Connect, "<redis>", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::unavailable(StoreOp::Connect, "<redis>", e))?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // `OK` when the key was created, nil when it already existed.
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::unavailable(StoreOp::Acquire, key, e))?;
        Ok(reply.is_some())
    }

    async fn current_holder(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::unavailable(StoreOp::Lookup, key, e))
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = ::redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::unavailable(StoreOp::Renew, key, e))?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::unavailable(StoreOp::Release, key, e))?;
        Ok(deleted == 1)
    }
}
