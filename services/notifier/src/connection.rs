//! Push channel lifecycle: connect, join the user's room, ingest frames,
//! reconnect a bounded number of times.
//!
//! Exactly one channel is open per identity. The manager never reports
//! errors to its caller; it publishes a [`ConnectionStatus`] instead.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use notify_protocol::{ClientFrame, JoinRoom};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::actor::StoreHandle;
use crate::model::Identity;
use crate::normalizer::Normalizer;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub user_id: Option<String>,
    /// Successful connects, including reconnects.
    pub connects: u64,
    /// Successful connects that followed a disconnect or failed attempt.
    pub reconnects: u64,
    pub failed_attempts: u64,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

// ---------------------------------------------------------------------------
// Settings / errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// `ws://` or `wss://` URL of the push endpoint.
    pub push_url: String,
    /// Reconnect attempts per disconnection episode.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ChannelSettings {
    pub fn new(push_url: impl Into<String>) -> Self {
        Self {
            push_url: push_url.into(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid push URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid auth header: {0}")]
    InvalidHeader(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to join room: {0}")]
    Join(String),
}

/// Build the upgrade request, with a bearer header when a token is present.
pub fn build_push_request(url: &str, token: Option<&str>) -> Result<Request, ChannelError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| ChannelError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

    if let Some(token) = token {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", token).parse().map_err(
                |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                    ChannelError::InvalidHeader(e.to_string())
                },
            )?,
        );
    }

    Ok(request)
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Spawn the connection manager. It follows `identity` until `shutdown`
/// flips to true.
pub fn spawn_connection_manager(
    settings: ChannelSettings,
    identity: watch::Receiver<Option<Identity>>,
    store: StoreHandle,
    normalizer: Normalizer,
    shutdown: watch::Receiver<bool>,
) -> (watch::Receiver<ConnectionStatus>, tokio::task::JoinHandle<()>) {
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
    let manager = ConnectionManager {
        settings,
        identity,
        store,
        normalizer,
        shutdown,
        status_tx,
    };
    (status_rx, tokio::spawn(manager.run()))
}

enum Interrupt {
    Shutdown,
    IdentityChanged,
}

enum SessionEnd {
    Disconnected(String),
    Interrupted(Interrupt),
    StoreClosed,
}

struct ConnectionManager {
    settings: ChannelSettings,
    identity: watch::Receiver<Option<Identity>>,
    store: StoreHandle,
    normalizer: Normalizer,
    shutdown: watch::Receiver<bool>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let current = self.identity.borrow_and_update().clone();
            let Some(current) = current else {
                self.status_tx.send_modify(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.user_id = None;
                });
                debug!("no identity; push channel idle");
                tokio::select! {
                    _ = wait_for_shutdown(&mut self.shutdown) => break,
                    res = self.identity.changed() => {
                        if res.is_err() {
                            // Provider gone: nobody can sign in any more.
                            wait_for_shutdown(&mut self.shutdown).await;
                            break;
                        }
                    }
                }
                continue;
            };

            match self.follow(&current).await {
                Interrupt::Shutdown => break,
                Interrupt::IdentityChanged => {
                    info!(user_id = %current.user_id, "identity changed; tearing down push channel");
                }
            }
        }
        self.status_tx.send_modify(|s| s.state = ConnectionState::Disconnected);
        info!("connection manager stopped");
    }

    /// Keep one channel open for `ident` until interrupted or out of
    /// reconnect attempts.
    async fn follow(&mut self, ident: &Identity) -> Interrupt {
        self.status_tx
            .send_modify(|s| s.user_id = Some(ident.user_id.clone()));

        // 0 = first connect for this identity, n = n-th reconnect attempt.
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                if attempt > self.settings.reconnect_attempts {
                    warn!(
                        user_id = %ident.user_id,
                        attempts = self.settings.reconnect_attempts,
                        "reconnect attempts exhausted; push channel idle"
                    );
                    self.set_state(ConnectionState::Disconnected);
                    return interrupted(&mut self.shutdown, &mut self.identity, ident).await;
                }
                tokio::select! {
                    why = interrupted(&mut self.shutdown, &mut self.identity, ident) => return why,
                    _ = sleep(self.settings.reconnect_delay) => {}
                }
                info!(attempt, "reconnect");
            }

            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                why = interrupted(&mut self.shutdown, &mut self.identity, ident) => return why,
                res = open_channel(&self.settings.push_url, ident) => res,
            };

            let ws = match opened {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(error = %e, attempt, "connect_error");
                    self.status_tx.send_modify(|s| {
                        s.state = ConnectionState::Disconnected;
                        s.failed_attempts += 1;
                        s.last_error = Some(e.to_string());
                    });
                    attempt += 1;
                    continue;
                }
            };

            let reconnected = attempt > 0;
            attempt = 0;
            self.status_tx.send_modify(|s| {
                s.state = ConnectionState::Connected;
                s.connects += 1;
                if reconnected {
                    s.reconnects += 1;
                }
                s.last_error = None;
            });
            info!(user_id = %ident.user_id, reconnected, "push channel connected");

            match self.session(ws, ident).await {
                SessionEnd::Disconnected(reason) => {
                    info!(reason = %reason, "disconnect");
                    self.status_tx.send_modify(|s| {
                        s.state = ConnectionState::Disconnected;
                        s.last_error = Some(reason);
                    });
                    attempt = 1;
                }
                SessionEnd::Interrupted(why) => return why,
                SessionEnd::StoreClosed => return Interrupt::Shutdown,
            }
        }
    }

    /// Pump frames from an open channel into the store.
    async fn session(&mut self, mut ws: WsStream, ident: &Identity) -> SessionEnd {
        loop {
            let msg = tokio::select! {
                biased;
                why = interrupted(&mut self.shutdown, &mut self.identity, ident) => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Interrupted(why);
                }
                msg = ws.next() => msg,
            };

            match msg {
                None => return SessionEnd::Disconnected("transport closed".to_owned()),
                Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                Some(Ok(Message::Text(text))) => {
                    let Some(record) = self.normalizer.accept_text(&text, Utc::now()) else {
                        continue;
                    };
                    if self.store.ingest(record).await.is_err() {
                        let _ = ws.close(None).await;
                        return SessionEnd::StoreClosed;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        return SessionEnd::Disconnected(e.to_string());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("server closed: {} {}", f.code, f.reason))
                        .unwrap_or_else(|| "server closed".to_owned());
                    return SessionEnd::Disconnected(reason);
                }
                Some(Ok(_)) => {}
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_modify(|s| s.state = state);
    }
}

/// Connect and send `join-room` before the channel is considered live.
async fn open_channel(url: &str, ident: &Identity) -> Result<WsStream, ChannelError> {
    let request = build_push_request(url, ident.token.as_deref())?;
    let (mut ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| ChannelError::Timeout(CONNECT_TIMEOUT))?
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    let join = ClientFrame::JoinRoom(JoinRoom {
        user_id: ident.user_id.clone(),
    });
    let text = serde_json::to_string(&join).map_err(|e| ChannelError::Join(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| ChannelError::Join(e.to_string()))?;
    debug!(user_id = %ident.user_id, "join-room sent");
    Ok(ws)
}

/// Resolves once shutdown is requested or its sender is dropped.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves when the session should end: shutdown, or the identity moved
/// away from `current`. Re-sending the same identity is ignored.
async fn interrupted(
    shutdown: &mut watch::Receiver<bool>,
    identity: &mut watch::Receiver<Option<Identity>>,
    current: &Identity,
) -> Interrupt {
    let identity_moved = async {
        loop {
            if identity.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            if identity.borrow_and_update().as_ref() != Some(current) {
                return;
            }
        }
    };
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => Interrupt::Shutdown,
        _ = identity_moved => Interrupt::IdentityChanged,
    }
}
