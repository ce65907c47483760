//! Timing policy for sync triggers
//!
//! Three independent guards: per-source debouncing of event bursts, a
//! per-source cooldown so a pull-induced write cannot re-trigger its own
//! sync, and a global minimum interval between runs. All are plain
//! bookkeeping over [`Instant`]; the orchestrator's loop supplies the time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Coalesces bursts of triggers per source into one delayed trigger.
///
/// Every new trigger inside the window reschedules the deadline, so the
/// trigger fires `window` after the last event of the burst.
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn trigger(&mut self, source: &str) {
        self.pending
            .insert(source.to_string(), Instant::now() + self.window);
    }

    /// Drain sources whose window has elapsed
    pub fn ready(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut fired = Vec::new();
        self.pending.retain(|source, deadline| {
            if *deadline <= now {
                fired.push(source.clone());
                false
            } else {
                true
            }
        });
        fired
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Suppresses re-triggering from a source for a while after it synced
pub struct Cooldown {
    duration: Duration,
    until: HashMap<String, Instant>,
}

impl Cooldown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            until: HashMap::new(),
        }
    }

    pub fn start(&mut self, source: &str) {
        self.until
            .insert(source.to_string(), Instant::now() + self.duration);
    }

    pub fn suppressed(&mut self, source: &str) -> bool {
        let now = Instant::now();
        self.until.retain(|_, deadline| *deadline > now);
        self.until.contains_key(source)
    }
}

/// Global gate between sync runs, independent of trigger origin.
///
/// A denied request is skipped, never queued; the next scheduled trigger
/// catches up.
pub struct MinInterval {
    interval: Duration,
    last: Option<Instant>,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Ok records this run; Err carries the remaining wait
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        if let Some(last) = self.last {
            let elapsed = now.duration_since(last);
            if elapsed < self.interval {
                return Err(self.interval - elapsed);
            }
        }
        self.last = Some(now);
        Ok(())
    }
}
