//! Delta computation and correlation bookkeeping

use latscope_shared::Timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for conditions the correlator recovers from.
///
/// None of these are errors: an orphan completion or a clock step is
/// accounted here and the event is otherwise ignored or clamped.
#[derive(Debug, Default)]
pub struct Correlator {
    orphans: AtomicU64,
    clock_anomalies: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `end - start`, clamped to zero when the end precedes the start
    pub fn delta(&self, start: Timestamp, end: Timestamp) -> u64 {
        match end.checked_sub(start) {
            Some(delta) => delta,
            None => {
                self.clock_anomalies.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Account a completion (or stage event) with no matching pending record
    pub fn orphan(&self) {
        self.orphans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn orphans(&self) -> u64 {
        self.orphans.load(Ordering::Relaxed)
    }

    pub fn clock_anomalies(&self) -> u64 {
        self.clock_anomalies.load(Ordering::Relaxed)
    }
}

/// Drop and anomaly counters of a running session, as shown to presenters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Completions with no matching start
    pub orphans: u64,
    /// Negative deltas clamped to zero
    pub clock_anomalies: u64,
    /// Starts rejected by a full state store
    pub pending_dropped: u64,
    /// Stat updates rejected by a full shard
    pub stats_dropped: u64,
    /// Events rejected by a full ring
    pub events_dropped: u64,
    /// Probe records that failed to decode
    pub decode_dropped: u64,
    /// Records the kernel lost before they reached user space
    pub lost_records: u64,
    /// Records currently pending in the state store
    pub pending: u64,
}

impl Diagnostics {
    pub fn total_dropped(&self) -> u64 {
        self.pending_dropped
            + self.stats_dropped
            + self.events_dropped
            + self.decode_dropped
            + self.lost_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_delta() {
        let correlator = Correlator::new();
        assert_eq!(correlator.delta(1_000, 151_000), 150_000);
        assert_eq!(correlator.delta(5, 5), 0);
        assert_eq!(correlator.clock_anomalies(), 0);
    }

    #[test]
    fn test_negative_delta_clamps() {
        let correlator = Correlator::new();
        assert_eq!(correlator.delta(2_000, 1_000), 0);
        assert_eq!(correlator.clock_anomalies(), 1);
    }

    #[test]
    fn test_orphans_are_counted() {
        let correlator = Correlator::new();
        correlator.orphan();
        correlator.orphan();
        assert_eq!(correlator.orphans(), 2);
    }
}
