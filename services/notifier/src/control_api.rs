//! Localhost control API for the notifier.
//!
//! Binds to 127.0.0.1:9191 by default.
//! Routes:
//!   GET    /api/v1/notifications            - current snapshot
//!   DELETE /api/v1/notifications            - clear all (204)
//!   POST   /api/v1/notifications/read-all   - mark all read (202)
//!   POST   /api/v1/notifications/{id}/read  - start read workflow (202/404)
//!   POST   /api/v1/notifications/{id}/open  - open action link (202/404/422)
//!   DELETE /api/v1/notifications/{id}       - dismiss (204, idempotent)
//!   GET    /api/v1/status                   - connection state + unread count
//!   GET    /api/v1/events                   - SSE stream of UI events

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::actor::{StoreClosed, StoreHandle};
use crate::alerts::{self, ActionError};
use crate::connection::ConnectionStatus;

/// Opens an action link. Replaceable so tests never launch a browser.
pub type LinkOpener = Arc<dyn Fn(&str) -> Result<(), ActionError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub store: StoreHandle,
    pub connection: watch::Receiver<ConnectionStatus>,
    /// Flips to true when the API is stopping; ends open event streams.
    pub shutdown: watch::Receiver<bool>,
    pub opener: LinkOpener,
}

impl AppState {
    pub fn new(
        store: StoreHandle,
        connection: watch::Receiver<ConnectionStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Self::with_opener(store, connection, shutdown, Arc::new(alerts::open_action_url))
    }

    pub fn with_opener(
        store: StoreHandle,
        connection: watch::Receiver<ConnectionStatus>,
        shutdown: watch::Receiver<bool>,
        opener: LinkOpener,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connection,
            shutdown,
            opener,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connection: ConnectionStatus,
    pub connected: bool,
    pub unread_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadAllResponse {
    pub marked: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn store_closed(_: StoreClosed) -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "notification store is closed")
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn get_notifications(State(state): State<Arc<AppState>>) -> Response {
    match state.store.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => store_closed(e),
    }
}

async fn clear_notifications(State(state): State<Arc<AppState>>) -> Response {
    match state.store.clear_all().await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_closed(e),
    }
}

async fn post_read_all(State(state): State<Arc<AppState>>) -> Response {
    match state.store.mark_all_read().await {
        Ok(marked) => (StatusCode::ACCEPTED, Json(ReadAllResponse { marked })).into_response(),
        Err(e) => store_closed(e),
    }
}

async fn post_read(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.mark_as_read(&id).await {
        Ok(true) => StatusCode::ACCEPTED.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("no notification {id}")),
        Err(e) => store_closed(e),
    }
}

async fn post_open(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let snapshot = match state.store.snapshot().await {
        Ok(s) => s,
        Err(e) => return store_closed(e),
    };
    let Some(record) = snapshot.get(&id) else {
        return error_response(StatusCode::NOT_FOUND, format!("no notification {id}"));
    };
    let Some(url) = record.action_url.as_deref() else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "notification has no action URL");
    };
    match (state.opener)(url) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e @ (ActionError::InvalidUrl(_) | ActionError::UnsupportedScheme(_))) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        Err(e) => {
            warn!(id = %id, error = %e, "failed to open action link");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.remove(&id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_closed(e),
    }
}

async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let connection = state.connection.borrow().clone();
    let unread_count = state.store.current().unread_count;
    Json(StatusResponse {
        connected: connection.is_connected(),
        connection,
        unread_count,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Router / server
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/notifications",           get(get_notifications).delete(clear_notifications))
        .route("/api/v1/notifications/read-all",  post(post_read_all))
        .route("/api/v1/notifications/{id}/read", post(post_read))
        .route("/api/v1/notifications/{id}/open", post(post_open))
        .route("/api/v1/notifications/{id}",      delete(delete_notification))
        .route("/api/v1/status",                  get(get_status))
        .route("/api/v1/events",                  get(crate::sse::notifier_sse))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolves once `shutdown` is true or its sender is gone.
pub(crate) async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Serve the control API until the state's shutdown signal flips to true.
/// Open event streams end on the same signal.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "control API listening");
    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_requested(shutdown))
        .await
}
