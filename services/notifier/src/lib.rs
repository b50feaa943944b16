pub mod actor;
pub mod alerts;
pub mod api;
pub mod config;
pub mod connection;
pub mod control_api;
pub mod engine;
pub mod model;
pub mod normalizer;
pub mod reconcile;
pub mod scheduler;
pub mod sse;
pub mod store;
pub mod sweeper;
pub mod ui_events;

pub use actor::{StoreClosed, StoreHandle, StoreSettings, spawn_store};
pub use alerts::{AlertPermission, AlertRequest, Alerter, LogAlerter};
pub use api::{ApiError, HttpNotificationApi, NotificationApi};
pub use connection::{ChannelSettings, ConnectionState, ConnectionStatus};
pub use engine::{EngineSettings, NotificationEngine};
pub use model::{Identity, Notification, Origin, StoreSnapshot};
pub use reconcile::EvictionPolicy;
