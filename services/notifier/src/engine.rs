//! Composition root: the store actor and the connection manager under one
//! shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actor::{StoreHandle, StoreSettings, spawn_store};
use crate::alerts::Alerter;
use crate::api::NotificationApi;
use crate::connection::{ChannelSettings, ConnectionStatus, spawn_connection_manager};
use crate::model::Identity;
use crate::normalizer::Normalizer;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub store: StoreSettings,
    pub channel: ChannelSettings,
}

pub struct NotificationEngine {
    store: StoreHandle,
    status: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    store_task: JoinHandle<()>,
    connection_task: JoinHandle<()>,
}

impl NotificationEngine {
    pub fn start(
        settings: EngineSettings,
        identity: watch::Receiver<Option<Identity>>,
        api: Arc<dyn NotificationApi>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (store, store_task) = spawn_store(api, settings.store, shutdown_rx.clone());
        let (status, connection_task) = spawn_connection_manager(
            settings.channel,
            identity,
            store.clone(),
            Normalizer::new(alerter),
            shutdown_rx,
        );
        info!("notification engine started");
        Self {
            store,
            status,
            shutdown_tx,
            store_task,
            connection_task,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close the channel, cancel every timer and in-flight call, and wait
    /// for both tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.connection_task.await {
            warn!(error = %e, "connection manager task failed");
        }
        if let Err(e) = self.store_task.await {
            warn!(error = %e, "store actor task failed");
        }
        info!("notification engine stopped");
    }
}
