//! OS/browser alerting surface.
//!
//! Alerts are fire-and-forget display requests. The category doubles as the
//! de-duplication tag so a newer alert of the same category replaces the
//! older one on platforms that support tagging.

use notify_protocol::Priority;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPermission {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub title: String,
    pub body: String,
    pub tag: String,
    /// Keep the alert on screen until the user dismisses it.
    pub require_interaction: bool,
}

impl AlertRequest {
    pub fn for_notification(n: &Notification) -> Self {
        Self {
            title: n.title.clone(),
            body: n.message.clone(),
            tag: n.category.as_str().to_owned(),
            require_interaction: n.priority == Priority::Urgent,
        }
    }
}

/// The alerting collaborator.
pub trait Alerter: Send + Sync {
    fn permission(&self) -> AlertPermission;
    fn show(&self, request: AlertRequest);
}

/// Request an alert for `n` when permission has been granted.
/// Returns whether a request was made.
pub fn dispatch(alerter: &dyn Alerter, n: &Notification) -> bool {
    if alerter.permission() != AlertPermission::Granted {
        debug!(id = %n.id, "alert permission not granted; skipping");
        return false;
    }
    alerter.show(AlertRequest::for_notification(n));
    true
}

/// Default alerter: writes each alert to the log.
pub struct LogAlerter {
    enabled: bool,
}

impl LogAlerter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Alerter for LogAlerter {
    fn permission(&self) -> AlertPermission {
        if self.enabled {
            AlertPermission::Granted
        } else {
            AlertPermission::Denied
        }
    }

    fn show(&self, request: AlertRequest) {
        info!(
            tag = %request.tag,
            persistent = request.require_interaction,
            title = %request.title,
            "alert: {}",
            request.body
        );
    }
}

// ---------------------------------------------------------------------------
// Action links
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid action URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to launch opener: {0}")]
    Launch(#[from] std::io::Error),
}

/// Only web links are opened.
pub fn validate_action_url(raw: &str) -> Result<Url, ActionError> {
    let url = Url::parse(raw.trim()).map_err(|e| ActionError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ActionError::UnsupportedScheme(other.to_owned())),
    }
}

/// Open `raw` in a new browsing context with the platform opener.
pub fn open_action_url(raw: &str) -> Result<(), ActionError> {
    let url = validate_action_url(raw)?;
    open::that_detached(url.as_str())?;
    info!(url = %url, "opened action link");
    Ok(())
}
