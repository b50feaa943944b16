use serde::Serialize;

use crate::connection::ConnectionStatus;
use crate::model::{Notification, StoreSnapshot};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Snapshot {
        notifications: Vec<Notification>,
        unread_count: usize,
    },
    StatusChanged {
        connection: ConnectionStatus,
    },
}

impl UiEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            UiEvent::Snapshot { .. } => "snapshot",
            UiEvent::StatusChanged { .. } => "status_changed",
        }
    }
}

impl From<StoreSnapshot> for UiEvent {
    fn from(snapshot: StoreSnapshot) -> Self {
        UiEvent::Snapshot {
            notifications: snapshot.notifications,
            unread_count: snapshot.unread_count,
        }
    }
}

impl From<ConnectionStatus> for UiEvent {
    fn from(connection: ConnectionStatus) -> Self {
        UiEvent::StatusChanged { connection }
    }
}
