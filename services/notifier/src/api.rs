//! HTTP collaborator that owns durable notification state.
//!
//!   PUT {base}/notifications/{id}/read   -> { "scheduledDeletionAt": ... }
//!   PUT {base}/notifications/read-all    -> any 2xx

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify_protocol::MarkReadResponse;
use reqwest::Url;
use tokio::sync::watch;
use tracing::debug;

use crate::model::Identity;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {status}")]
    Status { status: u16 },
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Remote persistence for read state.
pub trait NotificationApi: Send + Sync {
    /// Mark one notification read; returns the server's deletion time.
    fn mark_read<'a>(&'a self, id: &'a str) -> ApiFuture<'a, DateTime<Utc>>;

    fn mark_all_read(&self) -> ApiFuture<'_, ()>;
}

/// reqwest-backed client. The bearer token is read from the identity
/// channel on every request so a refreshed credential is picked up.
pub struct HttpNotificationApi {
    client: reqwest::Client,
    base_url: Url,
    identity: watch::Receiver<Option<Identity>>,
}

impl HttpNotificationApi {
    pub fn new(
        base_url: &str,
        identity: watch::Receiver<Option<Identity>>,
    ) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::Url(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Url(format!("{base_url}: cannot be a base")));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url,
            identity,
        })
    }

    /// `{base}/notifications/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::Url(format!("{}: cannot be a base", self.base_url)))?;
            path.pop_if_empty().push("notifications");
            path.extend(segments);
        }
        Ok(url)
    }

    fn put(&self, url: Url) -> reqwest::RequestBuilder {
        let token = self
            .identity
            .borrow()
            .as_ref()
            .and_then(|identity| identity.token.clone());
        let request = self.client.put(url);
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: status.as_u16(),
        })
    }
}

impl NotificationApi for HttpNotificationApi {
    fn mark_read<'a>(&'a self, id: &'a str) -> ApiFuture<'a, DateTime<Utc>> {
        Box::pin(async move {
            let url = self.endpoint(&[id, "read"])?;
            debug!(%url, "persisting read state");
            let response = check_status(self.put(url).send().await?)?;
            let body: MarkReadResponse = response.json().await?;
            Ok(body.scheduled_deletion_at)
        })
    }

    fn mark_all_read(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let url = self.endpoint(&["read-all"])?;
            debug!(%url, "persisting read-all");
            check_status(self.put(url).send().await?)?;
            Ok(())
        })
    }
}
