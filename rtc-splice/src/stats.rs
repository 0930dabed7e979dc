use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of one adapter's exchanges.
#[derive(Default, Debug)]
pub struct SpliceStats {
    observed: AtomicU64,
    captured: AtomicU64,
    substituted: AtomicU64,
    drained: AtomicU64,
    malformed: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`SpliceStats`].
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Inbound packets seen by the receive leg.
    pub observed: u64,
    /// Payloads published to the outbound channel.
    pub captured: u64,
    /// Payloads overwritten from the inbound channel.
    pub substituted: u64,
    /// Stale inbound messages discarded before a receive.
    pub drained: u64,
    /// Packets too short to hold their own header.
    pub malformed: u64,
    /// Channel operations that failed and degraded to pass-through.
    pub failures: u64,
    /// Bounded receives that hit their deadline.
    pub timeouts: u64,
}

impl SpliceStats {
    pub(crate) fn inc_observed(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_substituted(&self) {
        self.substituted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_drained(&self, n: usize) {
        self.drained.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            observed: self.observed.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            substituted: self.substituted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
