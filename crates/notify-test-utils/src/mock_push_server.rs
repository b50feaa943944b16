// mock_push_server: an in-process push endpoint for exercising notification clients.
//
// Accepts WebSocket connections on ws://127.0.0.1:<port>, records every
// `join-room` command, and lets the test push directed or broadcast frames
// and sever live connections to simulate transport resets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use notify_protocol::{ClientFrame, ServerFrame};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

enum Outgoing {
    Text(String),
    Close,
}

struct Connection {
    room: Option<String>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

#[derive(Default)]
struct Shared {
    joins: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    connections: Mutex<HashMap<u64, Connection>>,
    next_conn_id: AtomicU64,
    accepted: AtomicUsize,
}

/// A mock push server for integration testing.
///
/// Binds to port 0 and exposes the bound address. Room membership is
/// per-connection: a fresh connection receives directed frames only after it
/// has sent `join-room`, exactly like a server that forgets rooms on reset.
pub struct MockPushServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockPushServer {
    /// Start the mock server on a random local port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            Self::accept_loop(listener, accept_shared).await;
        });

        Ok(Self {
            addr,
            shared,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL of the push endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every `join-room` user id received so far, in arrival order.
    pub fn joins(&self) -> Vec<String> {
        self.shared.joins.lock().unwrap().clone()
    }

    /// `Authorization` header of each accepted upgrade, in accept order.
    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.shared.auth_headers.lock().unwrap().clone()
    }

    /// Total WebSocket upgrades accepted since start.
    pub fn accepted_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.shared.connections.lock().unwrap().len()
    }

    /// Poll until at least `count` joins were recorded or `limit` elapses.
    pub async fn wait_for_joins(&self, count: usize, limit: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let joins = self.joins();
            if joins.len() >= count || tokio::time::Instant::now() >= deadline {
                return joins;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Push a frame to every connection that joined `user_id`'s room.
    /// Returns the number of connections it was queued on.
    pub fn push_to_room(&self, user_id: &str, frame: &ServerFrame) -> usize {
        let text = serde_json::to_string(frame).expect("server frame serializes");
        self.send_where(|conn| conn.room.as_deref() == Some(user_id), text)
    }

    /// Push a frame to every live connection regardless of room.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        let text = serde_json::to_string(frame).expect("server frame serializes");
        self.send_where(|_| true, text)
    }

    /// Push arbitrary text to every live connection.
    pub fn broadcast_raw(&self, text: &str) -> usize {
        self.send_where(|_| true, text.to_owned())
    }

    /// Close every live connection from the server side.
    pub fn drop_connections(&self) {
        let mut conns = self.shared.connections.lock().unwrap();
        for (_, conn) in conns.drain() {
            let _ = conn.tx.send(Outgoing::Close);
        }
    }

    /// Stop accepting new connections; the port starts refusing.
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }

    // -- internal --

    fn send_where(&self, pred: impl Fn(&Connection) -> bool, text: String) -> usize {
        let conns = self.shared.connections.lock().unwrap();
        conns
            .values()
            .filter(|conn| pred(conn))
            .filter(|conn| conn.tx.send(Outgoing::Text(text.clone())).is_ok())
            .count()
    }

    async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
        while let Ok((stream, _peer)) = listener.accept().await {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                // Client drops are expected in tests.
                let _ = Self::handle_connection(stream, shared).await;
            });
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        shared: Arc<Shared>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let header_shared = Arc::clone(&shared);
        let record_auth = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            header_shared.auth_headers.lock().unwrap().push(auth);
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, record_auth).await?;
        shared.accepted.fetch_add(1, Ordering::SeqCst);

        let conn_id = shared.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared
            .connections
            .lock()
            .unwrap()
            .insert(conn_id, Connection { room: None, tx });

        let (mut write, mut read) = ws.split();
        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = async {
            loop {
                tokio::select! {
                    out = rx.recv() => match out {
                        Some(Outgoing::Text(text)) => write.send(Message::Text(text.into())).await?,
                        Some(Outgoing::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    },
                    msg = read.next() => match msg {
                        None | Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(ClientFrame::JoinRoom(join)) = serde_json::from_str(&text) {
                                shared.joins.lock().unwrap().push(join.user_id.clone());
                                let mut conns = shared.connections.lock().unwrap();
                                if let Some(conn) = conns.get_mut(&conn_id) {
                                    conn.room = Some(join.user_id);
                                }
                            }
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
        }
        .await;

        shared.connections.lock().unwrap().remove(&conn_id);
        result
    }
}

impl Drop for MockPushServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}
