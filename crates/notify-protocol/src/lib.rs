// notify-protocol: push-channel frames and HTTP bodies for the notification engine.
//
// Every push frame is a JSON text message with an `event` discriminator and a
// `data` body, mirroring the event names the admissions backend emits.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

/// Visual/semantic kind of a notification (`type` on the wire).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Payment,
    Application,
}

impl NotificationKind {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "payment" => Some(Self::Payment),
            "application" => Some(Self::Application),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Payment => "payment",
            Self::Application => "application",
        }
    }
}

/// Business category of a notification. Doubles as the OS alert tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    General,
    Payment,
    Application,
    Deadline,
    Scholarship,
    AdmissionUpdate,
    Form,
}

impl Category {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Self::General),
            "payment" => Some(Self::Payment),
            "application" => Some(Self::Application),
            "deadline" => Some(Self::Deadline),
            "scholarship" => Some(Self::Scholarship),
            "admission_update" => Some(Self::AdmissionUpdate),
            "form" => Some(Self::Form),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Payment => "payment",
            Self::Application => "application",
            Self::Deadline => "deadline",
            Self::Scholarship => "scholarship",
            Self::AdmissionUpdate => "admission_update",
            Self::Form => "form",
        }
    }
}

/// Delivery priority. Only `Urgent` asks for a persistent OS alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound payload
// ---------------------------------------------------------------------------

/// Body of a `notification` / `broadcast-notification` frame.
///
/// Every field is optional and leniently typed: numbers and booleans are
/// accepted where text is expected, and anything else degrades to `None`.
/// The frame as a whole is only rejected when `data` is not a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// RFC 3339 text or epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<serde_json::Value>,
}

impl NotificationPayload {
    /// Resolve `createdAt` when it is a parseable timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self.created_at.as_ref()? {
            serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            _ => None,
        }
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Push channel frames
// ---------------------------------------------------------------------------

/// Frames the server pushes to a connected client.
///
/// ```json
/// { "event": "notification", "data": { "title": "...", "message": "..." } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    /// Directed at the room of one user.
    #[serde(rename = "notification")]
    Notification(NotificationPayload),
    /// Delivered to every connected client regardless of room.
    #[serde(rename = "broadcast-notification")]
    BroadcastNotification(NotificationPayload),
}

/// Room join request, sent after every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub user_id: String,
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "join-room")]
    JoinRoom(JoinRoom),
}

// ---------------------------------------------------------------------------
// HTTP collaborator bodies
// ---------------------------------------------------------------------------

/// Success body of `PUT /notifications/{id}/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub scheduled_deletion_at: DateTime<Utc>,
}

