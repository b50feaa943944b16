use chrono::{DateTime, Utc};
use notify_protocol::{Category, NotificationKind, Priority};
use serde::{Deserialize, Serialize};

/// Which push event a record arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Directed,
    Broadcast,
}

/// The canonical notification record held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub category: Category,
    pub priority: Priority,
    pub action_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the read workflow begins.
    pub read_at: Option<DateTime<Utc>>,
    /// Presence means "evict once elapsed".
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    pub is_real_time: bool,
    pub origin: Origin,
}

impl Notification {
    /// An unread, real-time record with default kind/category/priority.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::default(),
            category: Category::default(),
            priority: Priority::default(),
            action_url: None,
            metadata: None,
            read: false,
            created_at,
            read_at: None,
            scheduled_deletion_at: None,
            is_real_time: true,
            origin: Origin::Directed,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_deletion_at.is_some_and(|at| at <= now)
    }
}

/// Point-in-time view of the store, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

impl StoreSnapshot {
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }
}

/// The signed-in user as supplied by the session provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Bearer credential; absent for anonymous sessions.
    pub token: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn notification_serializes_camel_case_with_type_field() {
        let n = Notification::new("n1", "Deadline", "KNUST form closes soon", Utc::now());
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "info");
        assert_eq!(json["category"], "general");
        assert_eq!(json["priority"], "normal");
        assert_eq!(json["isRealTime"], true);
        assert!(json["scheduledDeletionAt"].is_null());
    }

    #[test]
    fn expiry_requires_a_schedule_in_the_past() {
        let now = Utc::now();
        let mut n = Notification::new("n1", "t", "m", now);
        assert!(!n.is_expired(now));
        n.scheduled_deletion_at = Some(now + TimeDelta::seconds(5));
        assert!(!n.is_expired(now));
        assert!(n.is_expired(now + TimeDelta::seconds(5)));
    }

    #[test]
    fn identity_debug_redacts_token() {
        let identity = Identity::new("user-1", Some("secret".to_owned()));
        let printed = format!("{identity:?}");
        assert!(printed.contains("user-1"));
        assert!(!printed.contains("secret"));
    }
}
