//! Push channel lifecycle against the mock push server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{FakeApi, ReadReply, RecordingAlerter, wait_until};
use notifier::actor::{StoreHandle, StoreSettings, spawn_store};
use notifier::connection::{ChannelSettings, ConnectionState, ConnectionStatus, spawn_connection_manager};
use notifier::model::{Identity, Origin};
use notifier::normalizer::Normalizer;
use notify_protocol::{NotificationPayload, ServerFrame};
use notify_test_utils::MockPushServer;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    store: StoreHandle,
    status: watch::Receiver<ConnectionStatus>,
    identity_tx: watch::Sender<Option<Identity>>,
    shutdown_tx: watch::Sender<bool>,
    alerter: Arc<RecordingAlerter>,
    manager: JoinHandle<()>,
}

impl Harness {
    fn start(push_url: String, identity: Option<Identity>, reconnect_attempts: u32) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (identity_tx, identity_rx) = watch::channel(identity);
        let api = Arc::new(FakeApi::new(ReadReply::Confirm(Utc::now())));
        let (store, _store_task) = spawn_store(api, StoreSettings::default(), shutdown_rx.clone());
        let alerter = Arc::new(RecordingAlerter::default());
        let settings = ChannelSettings {
            push_url,
            reconnect_attempts,
            reconnect_delay: Duration::from_millis(50),
        };
        let (status, manager) = spawn_connection_manager(
            settings,
            identity_rx,
            store.clone(),
            Normalizer::new(alerter.clone()),
            shutdown_rx,
        );
        Self {
            store,
            status,
            identity_tx,
            shutdown_tx,
            alerter,
            manager,
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    async fn wait_connected(&self) -> bool {
        wait_until(WAIT, || self.status().is_connected()).await
    }
}

fn user(id: &str) -> Option<Identity> {
    Some(Identity::new(id, Some(format!("token-{id}"))))
}

fn payload(id: &str, title: &str) -> NotificationPayload {
    NotificationPayload {
        id: Some(id.to_owned()),
        title: Some(title.to_owned()),
        message: Some("body".to_owned()),
        ..Default::default()
    }
}

#[tokio::test]
async fn joins_room_with_bearer_auth_on_connect() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);

    assert_eq!(server.wait_for_joins(1, WAIT).await, ["user-1"]);
    assert!(h.wait_connected().await);
    assert_eq!(server.auth_headers(), [Some("Bearer token-user-1".to_owned())]);

    let status = h.status();
    assert_eq!(status.user_id.as_deref(), Some("user-1"));
    assert_eq!(status.connects, 1);
    assert_eq!(status.reconnects, 0);
}

#[tokio::test]
async fn rejoins_after_transport_reset_without_duplicate_channel() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    server.wait_for_joins(1, WAIT).await;

    server.drop_connections();

    let joins = server.wait_for_joins(2, WAIT).await;
    assert_eq!(joins, ["user-1", "user-1"]);
    assert!(wait_until(WAIT, || h.status().reconnects == 1).await);
    assert!(h.status().is_connected());
    assert_eq!(server.accepted_connections(), 2);
    assert_eq!(server.live_connections(), 1);
}

#[tokio::test]
async fn directed_and_broadcast_frames_reach_the_store() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    server.wait_for_joins(1, WAIT).await;

    assert_eq!(
        server.push_to_room("user-1", &ServerFrame::Notification(payload("d1", "Directed"))),
        1
    );
    assert!(wait_until(WAIT, || h.store.current().notifications.len() == 1).await);
    server.broadcast(&ServerFrame::BroadcastNotification(payload("b1", "Broadcast")));
    assert!(wait_until(WAIT, || h.store.current().notifications.len() == 2).await);

    let snap = h.store.snapshot().await.unwrap();
    assert_eq!(snap.unread_count, 2);
    assert_eq!(snap.notifications[0].id, "b1");
    assert_eq!(snap.notifications[0].origin, Origin::Broadcast);
    assert_eq!(snap.notifications[1].origin, Origin::Directed);
    assert!(snap.notifications.iter().all(|n| n.is_real_time));
    assert_eq!(h.alerter.shown().len(), 2);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    server.wait_for_joins(1, WAIT).await;

    server.broadcast_raw("definitely not json");
    server.broadcast_raw(r#"{"event":"typing","data":{}}"#);
    server.broadcast_raw(r#"{"event":"notification","data":[1,2,3]}"#);
    server.broadcast_raw(r#"{"event":"notification","data":{"title":"ok","priority":42}}"#);

    assert!(wait_until(WAIT, || h.store.current().notifications.len() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = h.store.snapshot().await.unwrap();
    assert_eq!(snap.notifications.len(), 1);
    assert_eq!(snap.notifications[0].title, "ok");
    assert!(h.status().is_connected(), "bad frames do not drop the channel");
}

#[tokio::test]
async fn no_identity_means_no_connection() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), None, 5);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted_connections(), 0);
    assert_eq!(h.status().state, ConnectionState::Disconnected);

    h.identity_tx.send(user("late-user")).unwrap();
    assert_eq!(server.wait_for_joins(1, WAIT).await, ["late-user"]);
    assert!(h.wait_connected().await);
}

#[tokio::test]
async fn losing_identity_closes_the_channel() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    assert!(h.wait_connected().await);

    h.identity_tx.send(None).unwrap();

    assert!(wait_until(WAIT, || server.live_connections() == 0).await);
    assert!(wait_until(WAIT, || h.status().state == ConnectionState::Disconnected).await);
    assert_eq!(h.status().user_id, None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted_connections(), 1, "no reconnect without identity");
}

#[tokio::test]
async fn switching_identity_rejoins_as_the_new_user() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    server.wait_for_joins(1, WAIT).await;

    h.identity_tx.send(user("user-2")).unwrap();

    assert_eq!(server.wait_for_joins(2, WAIT).await, ["user-1", "user-2"]);
    assert!(wait_until(WAIT, || server.live_connections() == 1).await);
    assert!(wait_until(WAIT, || h.status().user_id.as_deref() == Some("user-2")).await);
}

#[tokio::test]
async fn resending_the_same_identity_keeps_the_channel() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    server.wait_for_joins(1, WAIT).await;

    h.identity_tx.send(user("user-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.accepted_connections(), 1);
    assert_eq!(server.joins().len(), 1);
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 3);
    assert!(h.wait_connected().await);

    server.stop_accepting();
    server.drop_connections();

    // Three reconnect attempts, then idle.
    assert!(wait_until(WAIT, || h.status().failed_attempts == 3).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = h.status();
    assert_eq!(status.failed_attempts, 3);
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn initial_connect_failure_retries_then_idles() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let h = Harness::start(format!("ws://{addr}"), user("user-1"), 2);

    // First attempt plus two reconnects.
    assert!(wait_until(WAIT, || h.status().failed_attempts == 3).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.status().failed_attempts, 3);
    assert_eq!(h.status().connects, 0);
}

#[tokio::test]
async fn shutdown_closes_the_channel() {
    let server = MockPushServer::start().await.unwrap();
    let h = Harness::start(server.url(), user("user-1"), 5);
    assert!(h.wait_connected().await);

    h.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, h.manager)
        .await
        .expect("manager stops")
        .unwrap();

    assert!(wait_until(WAIT, || server.live_connections() == 0).await);
    assert_eq!(h.status.borrow().state, ConnectionState::Disconnected);
}
