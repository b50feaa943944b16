#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notifier::alerts::{AlertPermission, AlertRequest, Alerter};
use notifier::api::{ApiError, ApiFuture, NotificationApi};
use notifier::model::Notification;
use notifier::normalizer::{normalize, parse_frame};

/// What the fake collaborator answers to `PUT /notifications/{id}/read`.
#[derive(Debug, Clone, Copy)]
pub enum ReadReply {
    Confirm(DateTime<Utc>),
    Fail(u16),
    Hang,
}

pub struct FakeApi {
    reply: ReadReply,
    delay: Duration,
    read_all_ok: bool,
    read_calls: Mutex<Vec<String>>,
    read_all_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new(reply: ReadReply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            read_all_ok: true,
            read_calls: Mutex::new(Vec::new()),
            read_all_calls: AtomicUsize::new(0),
        }
    }

    /// Respond only after `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_read_all(mut self) -> Self {
        self.read_all_ok = false;
        self
    }

    pub fn read_calls(&self) -> Vec<String> {
        self.read_calls.lock().unwrap().clone()
    }

    pub fn read_all_calls(&self) -> usize {
        self.read_all_calls.load(Ordering::SeqCst)
    }
}

impl NotificationApi for FakeApi {
    fn mark_read<'a>(&'a self, id: &'a str) -> ApiFuture<'a, DateTime<Utc>> {
        self.read_calls.lock().unwrap().push(id.to_owned());
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                ReadReply::Confirm(at) => Ok(at),
                ReadReply::Fail(status) => Err(ApiError::Status { status }),
                ReadReply::Hang => std::future::pending().await,
            }
        })
    }

    fn mark_all_read(&self) -> ApiFuture<'_, ()> {
        self.read_all_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.read_all_ok {
                Ok(())
            } else {
                Err(ApiError::Unavailable("offline".to_owned()))
            }
        })
    }
}

#[derive(Default)]
pub struct RecordingAlerter {
    shown: Mutex<Vec<AlertRequest>>,
}

impl RecordingAlerter {
    pub fn shown(&self) -> Vec<AlertRequest> {
        self.shown.lock().unwrap().clone()
    }
}

impl Alerter for RecordingAlerter {
    fn permission(&self) -> AlertPermission {
        AlertPermission::Granted
    }

    fn show(&self, request: AlertRequest) {
        self.shown.lock().unwrap().push(request);
    }
}

/// Canonical record from a raw push frame.
pub fn from_frame(text: &str) -> Notification {
    normalize(parse_frame(text).expect("valid frame"), Utc::now())
}

pub fn simple(id: &str) -> Notification {
    Notification::new(id, format!("title {id}"), "message", Utc::now())
}

/// Poll `cond` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
