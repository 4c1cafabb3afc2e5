//! A manually-advanced clock for deterministic staleness/sync tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Produces `DateTime<Utc>` values that only move when [`ManualClock::advance`]
/// is called, so cache-staleness and retry-backoff assertions don't race a
/// real clock.
#[derive(Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new(Utc.timestamp_opt(0, 0).unwrap())
    }
}

impl ManualClock {
    /// Starts the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    /// The current simulated time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .unwrap()
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.millis.fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_now_forward() {
        let clock = ManualClock::default();
        let before = clock.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), before + chrono::Duration::seconds(30));
    }
}
