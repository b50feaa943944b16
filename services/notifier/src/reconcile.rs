//! Read reconciliation: optimistic local apply, then merge the outcome of the
//! remote mark-read call back into the store.
//!
//! The remote call itself is issued by the store actor between
//! [`begin_read`] and [`finish_read`].

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::scheduler::Scheduler;
use crate::store::{NotificationStore, ReadTransition};

/// How the local eviction timer relates to the server-confirmed deletion
/// time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// The local timer armed at read time always removes the record. The
    /// server's time is recorded but never extends the local lifetime.
    #[default]
    Unconditional,
    /// A confirmed server time re-arms the local timer. On failure the
    /// original timer stays armed.
    DeferToServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStart {
    /// Optimistically applied; the remote call should be issued.
    Started { scheduled_deletion_at: DateTime<Utc> },
    AlreadyRead,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Server time recorded; local timer unchanged.
    Confirmed { scheduled_deletion_at: DateTime<Utc> },
    /// Server time recorded and the local timer re-armed to it.
    Rearmed { scheduled_deletion_at: DateTime<Utc> },
    /// Call failed; schedule cleared, read flag kept.
    Cleared,
    /// Record is gone or no longer read; outcome ignored.
    Stale,
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::zero())
}

/// Steps 1-2: mark read and arm the local eviction timer.
pub fn begin_read(
    store: &mut NotificationStore,
    scheduler: &mut Scheduler,
    id: &str,
    now: DateTime<Utc>,
    eviction_after: Duration,
) -> ReadStart {
    match store.apply_read(id, now, to_delta(eviction_after)) {
        Some(ReadTransition::Applied {
            scheduled_deletion_at,
        }) => {
            scheduler.schedule_eviction(id, eviction_after);
            debug!(id, %scheduled_deletion_at, "read applied locally");
            ReadStart::Started {
                scheduled_deletion_at,
            }
        }
        Some(ReadTransition::AlreadyRead) => ReadStart::AlreadyRead,
        None => ReadStart::NotFound,
    }
}

/// Steps 4-5: merge the remote outcome.
pub fn finish_read(
    store: &mut NotificationStore,
    scheduler: &mut Scheduler,
    policy: EvictionPolicy,
    id: &str,
    outcome: Result<DateTime<Utc>, ApiError>,
    now: DateTime<Utc>,
) -> ReconcileResult {
    if !store.get(id).is_some_and(|n| n.read) {
        debug!(id, "read outcome arrived for a record that is gone");
        return ReconcileResult::Stale;
    }

    match outcome {
        Ok(at) => {
            store.set_scheduled_deletion(id, at);
            match policy {
                EvictionPolicy::Unconditional => {
                    info!(id, scheduled_deletion_at = %at, "read confirmed by server");
                    ReconcileResult::Confirmed {
                        scheduled_deletion_at: at,
                    }
                }
                EvictionPolicy::DeferToServer => {
                    let after = (at - now).to_std().unwrap_or(Duration::ZERO);
                    if !scheduler.schedule_eviction(id, after) {
                        debug!(id, scheduled_deletion_at = %at, "deletion time beyond timer range; left to the sweep");
                    }
                    info!(id, scheduled_deletion_at = %at, "read confirmed; eviction follows server");
                    ReconcileResult::Rearmed {
                        scheduled_deletion_at: at,
                    }
                }
            }
        }
        Err(e) => {
            warn!(id, error = %e, "failed to persist read state");
            store.clear_scheduled_deletion(id);
            ReconcileResult::Cleared
        }
    }
}
