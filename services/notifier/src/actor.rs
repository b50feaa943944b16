//! Single-owner store actor.
//!
//! The actor task is the only owner of the [`NotificationStore`] and its
//! [`Scheduler`]. Everything else talks to it through a [`StoreHandle`]
//! (commands over mpsc, replies over oneshot) and observes it through the
//! published [`StoreSnapshot`]. Remote mark-read calls run in a `JoinSet`
//! owned by the actor, so shutdown aborts them along with every timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::api::{ApiError, NotificationApi};
use crate::model::{Notification, StoreSnapshot};
use crate::reconcile::{self, EvictionPolicy, ReadStart};
use crate::scheduler::{Scheduler, Tick};
use crate::store::NotificationStore;
use crate::sweeper;

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Local eviction delay armed when a record is read.
    pub read_eviction: Duration,
    pub sweep_interval: Duration,
    pub eviction_policy: EvictionPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            read_eviction: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            eviction_policy: EvictionPolicy::Unconditional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification store is closed")]
pub struct StoreClosed;

enum StoreCommand {
    Ingest(Notification),
    MarkRead {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        reply: oneshot::Sender<usize>,
    },
    MarkAllRead {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<StoreSnapshot>,
    },
}

enum RemoteOutcome {
    Read {
        id: String,
        result: Result<chrono::DateTime<Utc>, ApiError>,
    },
    ReadAll(Result<(), ApiError>),
}

/// Cloneable front door to the store actor.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    snapshot_rx: watch::Receiver<StoreSnapshot>,
}

impl StoreHandle {
    /// Prepend a record (replacing any record with the same id).
    pub async fn ingest(&self, record: Notification) -> Result<(), StoreClosed> {
        self.tx
            .send(StoreCommand::Ingest(record))
            .await
            .map_err(|_| StoreClosed)
    }

    /// Start the read workflow. Returns false when no record has `id`.
    pub async fn mark_as_read(&self, id: &str) -> Result<bool, StoreClosed> {
        let id = id.to_owned();
        self.request(|reply| StoreCommand::MarkRead { id, reply }).await
    }

    /// Returns whether a record was removed.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreClosed> {
        let id = id.to_owned();
        self.request(|reply| StoreCommand::Remove { id, reply }).await
    }

    pub async fn clear_all(&self) -> Result<usize, StoreClosed> {
        self.request(|reply| StoreCommand::ClearAll { reply }).await
    }

    /// Mark everything read locally and notify the server best-effort.
    pub async fn mark_all_read(&self) -> Result<usize, StoreClosed> {
        self.request(|reply| StoreCommand::MarkAllRead { reply }).await
    }

    /// Snapshot taken after every command queued before this one.
    pub async fn snapshot(&self) -> Result<StoreSnapshot, StoreClosed> {
        self.request(|reply| StoreCommand::Snapshot { reply }).await
    }

    /// Latest published snapshot, without a round trip.
    pub fn current(&self) -> StoreSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, StoreClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| StoreClosed)?;
        rx.await.map_err(|_| StoreClosed)
    }
}

/// Spawn the store actor. It runs until `shutdown` flips to true or every
/// handle is dropped.
pub fn spawn_store(
    api: Arc<dyn NotificationApi>,
    settings: StoreSettings,
    shutdown: watch::Receiver<bool>,
) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(StoreSnapshot::default());
    let actor = StoreActor {
        store: NotificationStore::new(),
        scheduler: Scheduler::new(settings.sweep_interval),
        remote: JoinSet::new(),
        api,
        settings,
        snapshot_tx,
    };
    let task = tokio::spawn(actor.run(rx, shutdown));
    (StoreHandle { tx, snapshot_rx }, task)
}

struct StoreActor {
    store: NotificationStore,
    scheduler: Scheduler,
    remote: JoinSet<RemoteOutcome>,
    api: Arc<dyn NotificationApi>,
    settings: StoreSettings,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl StoreActor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<StoreCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            read_eviction = ?self.settings.read_eviction,
            sweep_interval = ?self.settings.sweep_interval,
            policy = ?self.settings.eviction_policy,
            "store actor started"
        );
        loop {
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                tick = self.scheduler.next_tick() => self.on_tick(tick),
                Some(joined) = self.remote.join_next(), if !self.remote.is_empty() => {
                    self.on_remote(joined);
                }
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }

        let in_flight = self.remote.len();
        self.remote.abort_all();
        self.scheduler.cancel_all();
        info!(in_flight, "store actor stopped");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.store.snapshot());
    }

    fn handle(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Ingest(record) => {
                let id = record.id.clone();
                if self.store.ingest(record).is_some() {
                    self.scheduler.cancel(&id);
                    debug!(id = %id, "replaced record with duplicate id");
                }
                info!(id = %id, unread = self.store.unread_count(), "notification ingested");
                self.publish();
            }
            StoreCommand::MarkRead { id, reply } => {
                let start = reconcile::begin_read(
                    &mut self.store,
                    &mut self.scheduler,
                    &id,
                    Utc::now(),
                    self.settings.read_eviction,
                );
                let found = start != ReadStart::NotFound;
                if let ReadStart::Started { .. } = start {
                    let api = Arc::clone(&self.api);
                    self.remote.spawn(async move {
                        let result = api.mark_read(&id).await;
                        RemoteOutcome::Read { id, result }
                    });
                    self.publish();
                }
                let _ = reply.send(found);
            }
            StoreCommand::Remove { id, reply } => {
                self.scheduler.cancel(&id);
                let removed = self.store.remove(&id).is_some();
                if removed {
                    debug!(id = %id, "notification removed");
                    self.publish();
                }
                let _ = reply.send(removed);
            }
            StoreCommand::ClearAll { reply } => {
                let cleared = self.store.clear_all();
                self.scheduler.cancel_all();
                info!(cleared, "notifications cleared");
                self.publish();
                let _ = reply.send(cleared);
            }
            StoreCommand::MarkAllRead { reply } => {
                let changed = self.store.mark_all_read(Utc::now());
                let api = Arc::clone(&self.api);
                self.remote
                    .spawn(async move { RemoteOutcome::ReadAll(api.mark_all_read().await) });
                self.publish();
                let _ = reply.send(changed);
            }
            StoreCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
        }
    }

    fn on_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Evict(id) => {
                if self.store.remove(&id).is_some() {
                    info!(id = %id, "evicted read notification");
                    self.publish();
                }
            }
            Tick::Sweep => {
                let report = sweeper::sweep(&mut self.store, &mut self.scheduler, Utc::now());
                if !report.is_empty() {
                    info!(removed = report.removed.len(), "sweep evicted expired notifications");
                    self.publish();
                }
            }
        }
    }

    fn on_remote(&mut self, joined: Result<RemoteOutcome, JoinError>) {
        match joined {
            Ok(RemoteOutcome::Read { id, result }) => {
                let outcome = reconcile::finish_read(
                    &mut self.store,
                    &mut self.scheduler,
                    self.settings.eviction_policy,
                    &id,
                    result,
                    Utc::now(),
                );
                debug!(id = %id, ?outcome, "read reconciled");
                self.publish();
            }
            Ok(RemoteOutcome::ReadAll(Ok(()))) => info!("read-all persisted"),
            Ok(RemoteOutcome::ReadAll(Err(e))) => {
                warn!(error = %e, "read-all not persisted; local state kept");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(error = %e, "remote call task failed"),
        }
    }
}
