//! HttpNotificationApi against an in-process collaborator.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::put;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use notifier::api::{ApiError, HttpNotificationApi, NotificationApi};
use notifier::model::Identity;
use tokio::sync::watch;

#[derive(Default)]
struct Collaborator {
    /// (path, Authorization header)
    requests: Mutex<Vec<(String, Option<String>)>>,
}

fn auth(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn mark_read(
    State(state): State<Arc<Collaborator>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state
        .requests
        .lock()
        .unwrap()
        .push((format!("/notifications/{id}/read"), auth(&headers)));
    if id == "broken" {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(serde_json::json!({ "scheduledDeletionAt": "2026-03-01T09:30:05Z" })).into_response()
}

async fn read_all(State(state): State<Arc<Collaborator>>, headers: HeaderMap) -> StatusCode {
    state
        .requests
        .lock()
        .unwrap()
        .push(("/notifications/read-all".to_owned(), auth(&headers)));
    StatusCode::NO_CONTENT
}

async fn spawn_collaborator() -> (SocketAddr, Arc<Collaborator>) {
    let state = Arc::new(Collaborator::default());
    let app = Router::new()
        .route("/api/notifications/read-all", put(read_all))
        .route("/api/notifications/{id}/read", put(mark_read))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn client(
    addr: SocketAddr,
    identity: Option<Identity>,
) -> (HttpNotificationApi, watch::Sender<Option<Identity>>) {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let (tx, rx) = watch::channel(identity);
    let api = HttpNotificationApi::new(&format!("http://{addr}/api"), rx).unwrap();
    (api, tx)
}

#[tokio::test]
async fn mark_read_returns_server_deletion_time() {
    let (addr, state) = spawn_collaborator().await;
    let (api, _tx) = client(addr, Some(Identity::new("u1", Some("tok-1".to_owned()))));

    let at = api.mark_read("n1").await.unwrap();
    assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 5).unwrap());

    let requests = state.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        [(
            "/notifications/n1/read".to_owned(),
            Some("Bearer tok-1".to_owned())
        )]
    );
}

#[tokio::test]
async fn anonymous_requests_carry_no_authorization() {
    let (addr, state) = spawn_collaborator().await;
    let (api, _tx) = client(addr, Some(Identity::new("u1", None)));

    api.mark_all_read().await.unwrap();
    let requests = state.requests.lock().unwrap().clone();
    assert_eq!(requests, [("/notifications/read-all".to_owned(), None)]);
}

#[tokio::test]
async fn refreshed_token_is_used_for_the_next_request() {
    let (addr, state) = spawn_collaborator().await;
    let (api, tx) = client(addr, Some(Identity::new("u1", Some("old".to_owned()))));

    api.mark_read("n1").await.unwrap();
    tx.send(Some(Identity::new("u1", Some("new".to_owned()))))
        .unwrap();
    api.mark_read("n2").await.unwrap();

    let auths: Vec<Option<String>> = state
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|(_, auth)| auth.clone())
        .collect();
    assert_eq!(
        auths,
        [Some("Bearer old".to_owned()), Some("Bearer new".to_owned())]
    );
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (addr, _state) = spawn_collaborator().await;
    let (api, _tx) = client(addr, None);

    match api.mark_read("broken").await {
        Err(ApiError::Status { status }) => assert_eq!(status, 500),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_route_is_an_error() {
    let (addr, _state) = spawn_collaborator().await;
    let _ = rustls::crypto::ring::default_provider().install_default();
    let (_tx, rx) = watch::channel(None);
    let api = HttpNotificationApi::new(&format!("http://{addr}/elsewhere"), rx).unwrap();

    assert!(matches!(
        api.mark_read("n1").await,
        Err(ApiError::Status { status: 404 })
    ));
}

#[tokio::test]
async fn unreachable_collaborator_is_a_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (api, _tx) = client(addr, None);

    assert!(matches!(api.mark_all_read().await, Err(ApiError::Request(_))));
}
