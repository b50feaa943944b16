//! In-memory notification store.
//!
//! Newest-first ordered sequence plus a derived unread counter. Pure and
//! synchronous: timers live in [`crate::scheduler`], network calls in
//! [`crate::reconcile`]/[`crate::actor`].

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::{Notification, StoreSnapshot};

/// Outcome of the optimistic read step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTransition {
    /// Record flipped to read; its deletion is scheduled at the given time.
    Applied { scheduled_deletion_at: DateTime<Utc> },
    /// Record was already read; nothing changed.
    AlreadyRead,
}

#[derive(Debug, Default)]
pub struct NotificationStore {
    items: VecDeque<Notification>,
    unread: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `record` as unread. A record with the same id is replaced;
    /// the displaced record is returned.
    pub fn ingest(&mut self, mut record: Notification) -> Option<Notification> {
        let replaced = self.remove(&record.id);
        record.read = false;
        self.items.push_front(record);
        self.unread += 1;
        replaced
    }

    /// Delete the record with `id`. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let pos = self.items.iter().position(|n| n.id == id)?;
        let removed = self.items.remove(pos)?;
        if !removed.read {
            self.unread = self.unread.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn clear_all(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        self.unread = 0;
        count
    }

    /// Optimistic read: `read = true`, `read_at = now`, deletion scheduled at
    /// `now + eviction_after`. `read_at` is only ever set once.
    pub fn apply_read(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        eviction_after: TimeDelta,
    ) -> Option<ReadTransition> {
        let record = self.items.iter_mut().find(|n| n.id == id)?;
        if record.read {
            return Some(ReadTransition::AlreadyRead);
        }
        let at = now + eviction_after;
        record.read = true;
        record.read_at = Some(now);
        record.scheduled_deletion_at = Some(at);
        self.unread = self.unread.saturating_sub(1);
        Some(ReadTransition::Applied {
            scheduled_deletion_at: at,
        })
    }

    pub fn set_scheduled_deletion(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(record) => {
                record.scheduled_deletion_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn clear_scheduled_deletion(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(record) => {
                record.scheduled_deletion_at = None;
                true
            }
            None => false,
        }
    }

    /// Local half of read-all: every unread record becomes read. No deletion
    /// is scheduled. Returns how many records changed.
    pub fn mark_all_read(&mut self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for record in self.items.iter_mut().filter(|n| !n.read) {
            record.read = true;
            record.read_at.get_or_insert(now);
            changed += 1;
        }
        self.unread = 0;
        changed
    }

    /// Remove every record whose scheduled deletion is at or before `now`.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<Notification> {
        let (expired, kept): (Vec<_>, Vec<_>) =
            self.items.drain(..).partition(|n| n.is_expired(now));
        self.items = kept.into();
        let unread_removed = expired.iter().filter(|n| !n.read).count();
        self.unread = self.unread.saturating_sub(unread_removed);
        expired
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notifications: self.items.iter().cloned().collect(),
            unread_count: self.unread,
        }
    }
}
