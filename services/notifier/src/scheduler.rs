//! The store's single timer set: one-shot evictions keyed by record id plus
//! the periodic sweep. Dropping the scheduler cancels everything it holds.

use std::collections::HashMap;
use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

/// Longest delay handed to the delay queue, well inside its range.
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The eviction timer for this id elapsed.
    Evict(String),
    /// Periodic sweep.
    Sweep,
}

pub struct Scheduler {
    evictions: DelayQueue<String>,
    keys: HashMap<String, Key>,
    sweep: Interval,
}

impl Scheduler {
    /// The first sweep fires one full `sweep_every` after construction.
    pub fn new(sweep_every: Duration) -> Self {
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            evictions: DelayQueue::new(),
            keys: HashMap::new(),
            sweep,
        }
    }

    /// Arm (or re-arm) the eviction timer for `id`.
    ///
    /// Delays beyond [`MAX_TIMER_DELAY`] are not armed: any pending timer for
    /// `id` is cancelled and `false` is returned, leaving the record to the
    /// sweep.
    pub fn schedule_eviction(&mut self, id: &str, after: Duration) -> bool {
        if after > MAX_TIMER_DELAY {
            self.cancel(id);
            return false;
        }
        match self.keys.get(id) {
            Some(key) => self.evictions.reset(key, after),
            None => {
                let key = self.evictions.insert(id.to_owned(), after);
                self.keys.insert(id.to_owned(), key);
            }
        }
        true
    }

    /// Returns whether a timer was pending for `id`.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.evictions.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Cancel every eviction timer. The sweep keeps running.
    pub fn cancel_all(&mut self) {
        self.evictions.clear();
        self.keys.clear();
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    pub fn pending(&self) -> usize {
        self.keys.len()
    }

    /// Wait for the next timer. Evictions win over a sweep that is due at
    /// the same instant. Cancel safe.
    pub async fn next_tick(&mut self) -> Tick {
        let evictions = &mut self.evictions;
        let sweep = &mut self.sweep;
        let tick = poll_fn(|cx| {
            if let Poll::Ready(Some(expired)) = evictions.poll_expired(cx) {
                return Poll::Ready(Tick::Evict(expired.into_inner()));
            }
            if sweep.poll_tick(cx).is_ready() {
                return Poll::Ready(Tick::Sweep);
            }
            Poll::Pending
        })
        .await;

        if let Tick::Evict(id) = &tick {
            self.keys.remove(id);
        }
        tick
    }
}
