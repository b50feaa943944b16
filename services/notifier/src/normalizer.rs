//! Push-frame boundary: parse raw channel text into a typed frame and build
//! the canonical [`Notification`] from it.
//!
//! Frame-level damage (not JSON, unknown event, non-object body) is rejected
//! here. Inside a well-formed body every field is defaulted instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use notify_protocol::{Category, NotificationKind, NotificationPayload, Priority, ServerFrame};
use tracing::{debug, warn};

use crate::alerts::{self, Alerter};
use crate::model::{Notification, Origin};

/// Why a channel message never reached the store.
#[derive(Debug, thiserror::Error)]
pub enum FrameRejection {
    #[error("frame is not JSON: {0}")]
    NotJson(String),
    #[error("frame has no event tag")]
    MissingEvent,
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
}

/// Parse one text frame from the push channel.
pub fn parse_frame(text: &str) -> Result<ServerFrame, FrameRejection> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FrameRejection::NotJson(e.to_string()))?;

    let event = match value.get("event") {
        Some(serde_json::Value::String(event)) => event.clone(),
        _ => return Err(FrameRejection::MissingEvent),
    };
    if event != "notification" && event != "broadcast-notification" {
        return Err(FrameRejection::UnknownEvent(event));
    }
    if !value.get("data").is_some_and(serde_json::Value::is_object) {
        return Err(FrameRejection::InvalidPayload {
            event,
            reason: "data is not an object".to_owned(),
        });
    }

    serde_json::from_value(value).map_err(|e| FrameRejection::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{unix_millis}-{session_seq}-{random}`. The sequence keeps ids distinct
/// inside a single millisecond.
pub fn synthesize_id(now: DateTime<Utc>) -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", now.timestamp_millis(), seq, &random[..8])
}

/// Build the canonical record from a parsed frame. Pure; no side effects.
pub fn normalize(frame: ServerFrame, received_at: DateTime<Utc>) -> Notification {
    let (payload, origin) = match frame {
        ServerFrame::Notification(p) => (p, Origin::Directed),
        ServerFrame::BroadcastNotification(p) => (p, Origin::Broadcast),
    };
    from_payload(payload, origin, received_at)
}

fn from_payload(payload: NotificationPayload, origin: Origin, received_at: DateTime<Utc>) -> Notification {
    let created_at = payload.created_at().unwrap_or(received_at);

    let id = match payload.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => synthesize_id(received_at),
    };

    let kind = payload
        .kind
        .as_deref()
        .and_then(NotificationKind::from_wire)
        .unwrap_or_default();
    let category = payload
        .category
        .as_deref()
        .and_then(Category::from_wire)
        .unwrap_or_default();
    let priority = payload
        .priority
        .as_deref()
        .and_then(Priority::from_wire)
        .unwrap_or_default();
    let action_url = payload
        .action_url
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty());

    Notification {
        id,
        title: payload.title.unwrap_or_default(),
        message: payload.message.unwrap_or_default(),
        kind,
        category,
        priority,
        action_url,
        metadata: payload.metadata,
        read: false,
        created_at,
        read_at: None,
        scheduled_deletion_at: None,
        is_real_time: true,
        origin,
    }
}

/// Normalizer plus its alert side effect.
#[derive(Clone)]
pub struct Normalizer {
    alerter: Arc<dyn Alerter>,
}

impl Normalizer {
    pub fn new(alerter: Arc<dyn Alerter>) -> Self {
        Self { alerter }
    }

    /// Normalize a parsed frame and request an OS alert for it.
    pub fn accept(&self, frame: ServerFrame, received_at: DateTime<Utc>) -> Notification {
        let notification = normalize(frame, received_at);
        alerts::dispatch(self.alerter.as_ref(), &notification);
        notification
    }

    /// Parse and accept raw channel text. Rejections are logged and dropped.
    pub fn accept_text(&self, text: &str, received_at: DateTime<Utc>) -> Option<Notification> {
        match parse_frame(text) {
            Ok(frame) => {
                let n = self.accept(frame, received_at);
                debug!(id = %n.id, origin = ?n.origin, "normalized push frame");
                Some(n)
            }
            Err(e) => {
                warn!(error = %e, "dropping push frame");
                None
            }
        }
    }
}
