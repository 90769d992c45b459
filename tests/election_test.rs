use praborrow_leader::memory::{MemoryStore, StoreOp};
use praborrow_leader::{
    ElectionConfig, ElectionError, Elector, ElectorBuilder, ElectorState, LeaderEvent, Step,
    StoreError,
};
use std::time::Duration;
use tokio::sync::broadcast;

const LOCK: &str = "integration";

fn elector(store: &MemoryStore, lease_ms: u64, retry_ms: u64) -> Elector<MemoryStore> {
    ElectorBuilder::new()
        .store(store.clone())
        .lock_name(LOCK)
        .configure(|c| {
            c.lease_duration = Duration::from_millis(lease_ms);
            c.retry_interval = Duration::from_millis(retry_ms);
        })
        .build()
        .unwrap()
}

fn drain(rx: &mut broadcast::Receiver<LeaderEvent>) -> Vec<LeaderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[test]
fn test_invalid_config_fails_before_store_calls() {
    let store = MemoryStore::new();
    let result = ElectorBuilder::new()
        .store(store.clone())
        .lease_duration(Duration::from_millis(3999))
        .retry_interval(Duration::from_millis(1000))
        .build();

    assert!(matches!(result, Err(ElectionError::Config(_))));
    assert_eq!(store.calls(StoreOp::Ping), 0);
    assert!(ElectionConfig::from_millis(4000, 1000).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_two_contenders_one_winner() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let b = elector(&store, 4000, 1000);
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.start().await.unwrap();
    b.start().await.unwrap();

    assert_eq!(drain(&mut a_events), vec![LeaderEvent::Elected]);
    assert!(drain(&mut b_events).is_empty());
    assert_eq!(a.next_step(), Some(Step::Renew));
    assert_eq!(b.next_step(), Some(Step::Elect));

    // B retries after one retry interval, still without a signal.
    let attempts = store.calls(StoreOp::ConditionalInsert);
    sleep_ms(1100).await;
    assert_eq!(store.calls(StoreOp::ConditionalInsert), attempts + 1);
    assert!(drain(&mut b_events).is_empty());

    assert!(a.is_leader().await.unwrap());
    assert!(!b.is_leader().await.unwrap());
    assert_eq!(store.holder(a.lock_key()).as_deref(), Some(a.identity()));
}

#[tokio::test(start_paused = true)]
async fn test_leader_keeps_lease_across_many_renewals() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let b = elector(&store, 4000, 1000);
    let mut a_events = a.subscribe();

    a.start().await.unwrap();
    b.start().await.unwrap();
    sleep_ms(20_100).await;

    assert_eq!(drain(&mut a_events), vec![LeaderEvent::Elected]);
    assert_eq!(a.metrics().renewals_total(), 10);
    assert_eq!(a.state(), ElectorState::Leading);
    assert_eq!(b.state(), ElectorState::Contending);
    assert_eq!(b.metrics().elections_won(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_timeout_signals_error_then_revoked() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let mut events = a.subscribe();
    a.start().await.unwrap();
    assert_eq!(drain(&mut events), vec![LeaderEvent::Elected]);

    let timeout = StoreError::Timeout("renewal timed out".into());
    store.fail_next(StoreOp::ConditionalUpdate, timeout.clone());
    sleep_ms(2100).await;

    assert_eq!(
        drain(&mut events),
        vec![LeaderEvent::Error(timeout), LeaderEvent::Revoked]
    );
    assert_eq!(a.next_step(), Some(Step::Elect));
    assert!(!a.is_leader_cached());

    let attempts = store.calls(StoreOp::ConditionalInsert);
    sleep_ms(1000).await;
    assert_eq!(store.calls(StoreOp::ConditionalInsert), attempts + 1);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_emitted_once_per_loss() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let b = elector(&store, 4000, 1000);
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.start().await.unwrap();
    store.evict(a.lock_key());
    b.start().await.unwrap();
    sleep_ms(10_000).await;

    assert_eq!(
        drain(&mut a_events),
        vec![LeaderEvent::Elected, LeaderEvent::Revoked]
    );
    assert_eq!(drain(&mut b_events), vec![LeaderEvent::Elected]);
    assert_eq!(a.metrics().revocations(), 1);
    assert!(a.metrics().elections_lost() >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_is_absorbed_and_recovered() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let mut events = a.subscribe();
    a.start().await.unwrap();
    assert_eq!(drain(&mut events), vec![LeaderEvent::Elected]);

    store.set_available(false);
    sleep_ms(3500).await;
    store.set_available(true);

    // Renewal at 2s and election at 3s fail; election at 4s sees our own
    // unexpired record; election at 5s finds it swept and wins.
    sleep_ms(2000).await;

    let events = drain(&mut events);
    assert_eq!(events.len(), 4, "unexpected events: {:?}", events);
    assert!(matches!(events[0], LeaderEvent::Error(StoreError::Unavailable(_))));
    assert_eq!(events[1], LeaderEvent::Revoked);
    assert!(matches!(events[2], LeaderEvent::Error(StoreError::Unavailable(_))));
    assert_eq!(events[3], LeaderEvent::Elected);
    assert_eq!(a.state(), ElectorState::Leading);
}

#[tokio::test(start_paused = true)]
async fn test_pause_answers_without_store() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    a.start().await.unwrap();
    assert!(a.is_leader().await.unwrap());
    let lookups = store.calls(StoreOp::FindOne);

    a.pause();

    assert!(!a.is_leader().await.unwrap());
    assert_eq!(store.calls(StoreOp::FindOne), lookups);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_share_one_provisioning() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(100));
    let a = elector(&store, 4000, 1000);

    let (r1, r2, r3) = tokio::join!(a.start(), a.start(), a.start());

    assert!(r1.is_ok() && r2.is_ok() && r3.is_ok());
    assert_eq!(store.calls(StoreOp::Ping), 1);
    assert_eq!(store.calls(StoreOp::EnsureNamespace), 1);
    assert_eq!(store.calls(StoreOp::ConditionalInsert), 1);

    a.start().await.unwrap();
    assert_eq!(store.calls(StoreOp::Ping), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_share_failure_then_retry() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(100));
    store.fail_next(StoreOp::Ping, StoreError::Unavailable("connection refused".into()));
    let a = elector(&store, 4000, 1000);

    let (r1, r2) = tokio::join!(a.start(), a.start());

    let expected = Err(ElectionError::Start(StoreError::Unavailable(
        "connection refused".into(),
    )));
    assert_eq!(r1, expected);
    assert_eq!(r2, expected);
    assert_eq!(store.calls(StoreOp::Ping), 1);
    assert_eq!(a.state(), ElectorState::Unprovisioned);

    a.start().await.unwrap();
    assert_eq!(store.calls(StoreOp::Ping), 2);
    assert_eq!(a.state(), ElectorState::Leading);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_start_reprovisions() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    a.start().await.unwrap();

    a.stop();
    assert_eq!(a.state(), ElectorState::Unprovisioned);
    a.start().await.unwrap();

    assert_eq!(store.calls(StoreOp::Ping), 2);
    assert_eq!(store.calls(StoreOp::EnsureNamespace), 2);
    assert_eq!(store.calls(StoreOp::ConfigureExpiry), 2);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_after_pause_is_discarded() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(500));
    let a = elector(&store, 4000, 1000);
    let mut events = a.subscribe();
    a.start().await.unwrap();

    // The renewal fires 2s after start and lands 500ms later.
    sleep_ms(2100).await;
    assert_eq!(store.calls(StoreOp::ConditionalUpdate), 1);
    store.evict(a.lock_key());
    a.pause();
    sleep_ms(10_000).await;

    assert_eq!(drain(&mut events), vec![LeaderEvent::Elected]);
    assert_eq!(store.calls(StoreOp::ConditionalUpdate), 1);
    assert_eq!(store.calls(StoreOp::ConditionalInsert), 1);
    assert_eq!(a.next_step(), None);
    assert_eq!(a.state(), ElectorState::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_failover_after_leader_stops() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let b = elector(&store, 4000, 1000);
    let mut b_events = b.subscribe();
    a.start().await.unwrap();
    b.start().await.unwrap();

    a.stop();
    sleep_ms(7000).await;

    assert_eq!(drain(&mut b_events), vec![LeaderEvent::Elected]);
    assert!(b.is_leader().await.unwrap());
    assert!(!a.is_leader_cached());
}

#[tokio::test(start_paused = true)]
async fn test_is_leader_starts_lazily() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);

    assert!(a.is_leader().await.unwrap());
    assert_eq!(store.calls(StoreOp::Ping), 1);
    assert_eq!(a.state(), ElectorState::Leading);
}

#[tokio::test(start_paused = true)]
async fn test_is_leader_surfaces_lookup_errors() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    a.start().await.unwrap();
    store.fail_next(StoreOp::FindOne, StoreError::Backend("cursor killed".into()));

    let result = a.is_leader().await;

    assert_eq!(
        result,
        Err(ElectionError::Store(StoreError::Backend("cursor killed".into())))
    );
}

#[tokio::test(start_paused = true)]
async fn test_changed_lease_reconciles_expiry_on_restart() {
    let store = MemoryStore::new();
    let short = elector(&store, 4000, 1000);
    short.start().await.unwrap();
    assert_eq!(store.expiry_of(short.lock_key()), Some(4));
    short.stop();

    let long = elector(&store, 9000, 1000);
    long.start().await.unwrap();

    assert_eq!(store.expiry_of(long.lock_key()), Some(9));
    assert_eq!(store.calls(StoreOp::DropExpiry), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_during_first_insert_rearms_loop() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(500));
    let a = elector(&store, 4000, 1000);

    // Four provisioning calls take 2s; the first insert lands at 2.5s.
    let (started, resumed) = tokio::join!(a.start(), async {
        sleep_ms(2200).await;
        assert_eq!(store.calls(StoreOp::ConditionalInsert), 1);
        a.pause();
        a.resume().await
    });
    assert!(started.is_ok());
    assert!(resumed.is_ok());
    assert_eq!(a.next_step(), Some(Step::Elect));

    // Our own orphaned record expires and the retry loop wins it back.
    sleep_ms(30_000).await;

    assert!(store.calls(StoreOp::ConditionalInsert) > 2);
    assert_eq!(a.next_step(), Some(Step::Renew));
    assert_eq!(a.state(), ElectorState::Leading);
    assert!(a.is_leader().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_takeover_reports_not_leading() {
    let store = MemoryStore::new();
    let a = elector(&store, 4000, 1000);
    let b = elector(&store, 4000, 1000);
    a.start().await.unwrap();
    b.start().await.unwrap();

    a.pause();
    store.evict(a.lock_key());
    sleep_ms(1100).await;
    assert!(b.is_leader().await.unwrap());

    a.resume().await.unwrap();
    sleep_ms(10_000).await;

    assert_eq!(a.state(), ElectorState::Contending);
    assert!(!a.is_leader_cached());
    assert!(!a.is_leader().await.unwrap());
    assert_eq!(a.metrics().role(), 0);
    assert!(b.is_leader().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_provisioning_cancels_start() {
    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(100));
    let a = elector(&store, 4000, 1000);

    let (result, ()) = tokio::join!(a.start(), async {
        sleep_ms(150).await;
        a.stop();
    });

    assert_eq!(result, Err(ElectionError::Stopped));
    assert_eq!(a.state(), ElectorState::Unprovisioned);
    sleep_ms(5000).await;
    assert_eq!(store.calls(StoreOp::ConditionalInsert), 0);
    assert_eq!(a.next_step(), None);

    a.start().await.unwrap();
    assert_eq!(store.calls(StoreOp::Ping), 2);
    assert_eq!(store.calls(StoreOp::ConditionalInsert), 1);
    assert_eq!(a.state(), ElectorState::Leading);
}
