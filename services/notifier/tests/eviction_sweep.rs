//! Periodic sweep as the backstop removal path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{FakeApi, ReadReply, simple};
use notifier::actor::{StoreHandle, StoreSettings, spawn_store};
use notifier::reconcile::EvictionPolicy;
use tokio::sync::watch;
use tokio::time::sleep;

/// Per-record timers far in the future so only the sweep can remove.
fn start_with_long_timer(api: Arc<FakeApi>) -> (StoreHandle, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let settings = StoreSettings {
        read_eviction: Duration::from_secs(120),
        sweep_interval: Duration::from_secs(10),
        eviction_policy: EvictionPolicy::Unconditional,
    };
    let (store, _task) = spawn_store(api, settings, shutdown_rx);
    (store, shutdown_tx)
}

#[tokio::test(start_paused = true)]
async fn next_sweep_removes_every_elapsed_record() {
    let already_due = Utc::now() - TimeDelta::seconds(1);
    let api = Arc::new(FakeApi::new(ReadReply::Confirm(already_due)));
    let (store, _shutdown) = start_with_long_timer(api);

    for id in ["a", "b", "c"] {
        store.ingest(simple(id)).await.unwrap();
    }
    // Read out of insertion order.
    store.mark_as_read("c").await.unwrap();
    store.mark_as_read("a").await.unwrap();

    sleep(Duration::from_secs(1)).await;
    let snap = store.snapshot().await.unwrap();
    assert_eq!(snap.notifications.len(), 3, "nothing removed before the sweep");
    assert_eq!(snap.get("a").unwrap().scheduled_deletion_at, Some(already_due));
    assert_eq!(snap.get("c").unwrap().scheduled_deletion_at, Some(already_due));

    let mut updates = store.subscribe();
    let _ = updates.borrow_and_update();
    sleep(Duration::from_secs(9) + Duration::from_millis(100)).await;

    // One publish took both records out.
    assert!(updates.has_changed().unwrap());
    let snap = updates.borrow_and_update().clone();
    let ids: Vec<&str> = snap.notifications.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["b"]);
    assert_eq!(snap.unread_count, 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_leaves_future_and_unscheduled_records() {
    let later = Utc::now() + TimeDelta::hours(1);
    let api = Arc::new(FakeApi::new(ReadReply::Confirm(later)));
    let (store, _shutdown) = start_with_long_timer(api);

    store.ingest(simple("read-later")).await.unwrap();
    store.ingest(simple("unread")).await.unwrap();
    store.mark_as_read("read-later").await.unwrap();

    sleep(Duration::from_secs(31)).await;
    let snap = store.snapshot().await.unwrap();
    assert_eq!(snap.notifications.len(), 2);
    assert_eq!(snap.unread_count, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_confirmation_is_not_swept() {
    let api = Arc::new(FakeApi::new(ReadReply::Fail(500)));
    let (store, _shutdown) = start_with_long_timer(api);

    store.ingest(simple("n1")).await.unwrap();
    store.mark_as_read("n1").await.unwrap();

    sleep(Duration::from_secs(21)).await;
    let snap = store.snapshot().await.unwrap();
    let n1 = snap.get("n1").expect("schedule was cleared, sweep must skip it");
    assert!(n1.read);
    assert!(n1.scheduled_deletion_at.is_none());

    // The local timer still removes it.
    sleep(Duration::from_secs(100)).await;
    assert!(store.snapshot().await.unwrap().get("n1").is_none());
}
