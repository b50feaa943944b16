//! Periodic backstop that removes every record whose scheduled deletion has
//! elapsed, independent of per-record timers.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::scheduler::Scheduler;
use crate::store::NotificationStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<String>,
    /// How many of the removed records were still unread.
    pub unread_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Remove expired records in one pass and cancel their eviction timers.
pub fn sweep(
    store: &mut NotificationStore,
    scheduler: &mut Scheduler,
    now: DateTime<Utc>,
) -> SweepReport {
    let expired = store.take_expired(now);
    let mut report = SweepReport::default();
    for record in expired {
        scheduler.cancel(&record.id);
        if !record.read {
            report.unread_removed += 1;
        }
        report.removed.push(record.id);
    }
    if !report.is_empty() {
        debug!(
            removed = report.removed.len(),
            unread_removed = report.unread_removed,
            "eviction sweep"
        );
    }
    report
}
