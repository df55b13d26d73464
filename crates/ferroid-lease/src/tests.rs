use crate::{
    Error, IdGeneratorFactory, InMemoryLeaseStore, LeaseConfig, LeaseState, LeaseStore,
    NodeAllocator, NodeLease, RetryPolicy, SLOT_COUNT, SnowflakeFactory,
};
use core::time::Duration;
use futures::future::join_all;
use std::{collections::HashSet, sync::Arc};
use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(3600);

/// Settings of one simulated process.
fn process() -> LeaseConfig {
    LeaseConfig {
        op_timeout: None,
        exhaustion_retry: RetryPolicy::no_retry(),
        ..Default::default()
    }
}

async fn allocate(store: &Arc<InMemoryLeaseStore>) -> crate::Result<NodeLease> {
    NodeAllocator::new(store.clone(), process())?
        .acquire_node_id()
        .await
}

async fn lease_slots(store: &InMemoryLeaseStore, slots: impl Iterator<Item = u16>, ttl: Duration) {
    let config = process();
    for slot in slots {
        assert!(
            store
                .acquire(&config.slot_key(slot), "elsewhere", ttl)
                .await
                .unwrap()
        );
    }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// A store that accepts requests but never answers them.
pub(crate) struct Unresponsive;

#[async_trait::async_trait]
impl LeaseStore for Unresponsive {
    async fn acquire(&self, _: &str, _: &str, _: Duration) -> crate::Result<bool> {
        core::future::pending().await
    }

    async fn current_holder(&self, _: &str) -> crate::Result<Option<String>> {
        core::future::pending().await
    }

    async fn renew(&self, _: &str, _: Duration) -> crate::Result<bool> {
        core::future::pending().await
    }

    async fn release(&self, _: &str, _: &str) -> crate::Result<bool> {
        core::future::pending().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_processes_never_share_a_node_id() {
    let store = Arc::new(InMemoryLeaseStore::new());

    let tasks = (0..SLOT_COUNT).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { allocate(&store).await })
    });
    let leases: Vec<NodeLease> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let ids: HashSet<u16> = leases.iter().map(|l| l.node_id().get()).collect();
    assert_eq!(ids.len(), usize::from(SLOT_COUNT));
    assert_eq!(store.len(), usize::from(SLOT_COUNT));

    // The slot space is now full.
    assert_eq!(
        allocate(&store).await.unwrap_err(),
        Error::NodeSpaceExhausted { slots: SLOT_COUNT }
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_fails_in_bounded_time() {
    let store = Arc::new(InMemoryLeaseStore::new());
    lease_slots(&store, 0..SLOT_COUNT, 24 * HOUR).await;

    let started = Instant::now();
    let config = LeaseConfig {
        op_timeout: None,
        ..Default::default()
    };
    let err = NodeAllocator::new(store.clone(), config)
        .unwrap()
        .acquire_node_id()
        .await
        .unwrap_err();

    assert_eq!(err, Error::NodeSpaceExhausted { slots: SLOT_COUNT });
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn last_free_slot_is_found() {
    let store = Arc::new(InMemoryLeaseStore::new());
    lease_slots(&store, 0..SLOT_COUNT - 1, 24 * HOUR).await;

    let lease = allocate(&store).await.unwrap();
    assert_eq!(lease.node_id().get(), 1023);
}

#[tokio::test(start_paused = true)]
async fn crashed_process_slot_is_reclaimed_after_ttl() {
    let store = Arc::new(InMemoryLeaseStore::new());
    lease_slots(&store, 0..5, 1000 * HOUR).await;

    let crashed = allocate(&store).await.unwrap();
    assert_eq!(crashed.node_id().get(), 5);
    // No release, the heartbeat just stops.
    drop(crashed);

    let survivor = allocate(&store).await.unwrap();
    assert_eq!(survivor.node_id().get(), 6);

    tokio::time::sleep(24 * HOUR + Duration::from_secs(1)).await;
    settle().await;

    let newcomer = allocate(&store).await.unwrap();
    assert_eq!(newcomer.node_id().get(), 5);
    assert_eq!(survivor.state(), LeaseState::Held);
}

#[tokio::test(start_paused = true)]
async fn renewal_keeps_ttl_above_half_life() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lease = allocate(&store).await.unwrap();
    let ttl = process().lease_ttl;

    let mut lowest = ttl;
    for _ in 0..36 {
        tokio::time::sleep(HOUR).await;
        settle().await;
        let remaining = store.remaining_ttl(lease.key()).unwrap();
        lowest = lowest.min(remaining);
    }

    assert!(lowest >= ttl / 2, "{lowest:?}");
    assert_eq!(lease.state(), LeaseState::Held);
}

#[tokio::test(start_paused = true)]
async fn repeated_renewal_keeps_the_owner() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lease = allocate(&store).await.unwrap();
    let owner = store.holder(lease.key());

    for _ in 0..10 {
        assert!(store.renew(lease.key(), 24 * HOUR).await.unwrap());
    }

    assert_eq!(store.holder(lease.key()), owner);
    let other = allocate(&store).await.unwrap();
    assert_ne!(other.node_id(), lease.node_id());
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_is_reported_as_such() {
    let store = Arc::new(InMemoryLeaseStore::new());
    store.set_available(false);

    let err = allocate(&store).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn outage_shorter_than_ttl_keeps_the_lease() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lease = allocate(&store).await.unwrap();

    tokio::time::sleep(11 * HOUR).await;
    store.set_available(false);
    tokio::time::sleep(6 * HOUR).await;
    store.set_available(true);
    tokio::time::sleep(HOUR).await;
    settle().await;

    assert_eq!(lease.state(), LeaseState::Held);
    let remaining = store.remaining_ttl(lease.key()).unwrap();
    assert!(remaining > 22 * HOUR, "{remaining:?}");
}

#[tokio::test(start_paused = true)]
async fn store_restart_is_repaired_at_next_heartbeat() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lease = allocate(&store).await.unwrap();
    assert_eq!(lease.node_id().get(), 0);

    store.clear();
    tokio::time::sleep(12 * HOUR + Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(lease.state(), LeaseState::Held);
    let next = allocate(&store).await.unwrap();
    assert_eq!(next.node_id().get(), 1);
}

#[tokio::test(start_paused = true)]
async fn graceful_release_hands_slot_to_next_process() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let first = allocate(&store).await.unwrap();
    let node_id = first.node_id();

    first.release().await.unwrap();
    let second = allocate(&store).await.unwrap();
    assert_eq!(second.node_id(), node_id);
}

#[tokio::test(start_paused = true)]
async fn stopped_lease_expires_on_schedule() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lease = allocate(&store).await.unwrap();
    let key = lease.key().to_string();

    assert_eq!(lease.stop().await, LeaseState::Stopped);
    tokio::time::sleep(23 * HOUR).await;
    assert!(store.remaining_ttl(&key).is_some());
    tokio::time::sleep(HOUR).await;
    assert!(store.remaining_ttl(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn allocated_node_id_seeds_the_generator() {
    let store = Arc::new(InMemoryLeaseStore::new());
    lease_slots(&store, 0..42, 24 * HOUR).await;
    let lease = allocate(&store).await.unwrap();

    let generator = SnowflakeFactory::default().build(lease.node_id()).unwrap();
    let id = generator.next_id(|_| std::thread::yield_now());
    assert_eq!(id.machine_id(), 42);
}
