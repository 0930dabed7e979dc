use std::fmt;
use std::time::Duration;

/// A reading of the system-wide monotonic clock (`CLOCK_MONOTONIC`).
///
/// Unlike [`std::time::Instant`], the value is absolute, so readings taken by
/// two cooperating processes on the same host can be compared directly. The
/// [`Display`](fmt::Display) form is `<seconds>.<nanoseconds>` with nine
/// fractional digits.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime {
    secs: u64,
    nanos: u32,
}

impl MonotonicTime {
    pub fn new(secs: u64, nanos: u32) -> Self {
        let d = Duration::new(secs, nanos);
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }

    #[cfg(unix)]
    pub fn now() -> Self {
        use nix::time::{ClockId, clock_gettime};

        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map(|ts| Self::new(ts.tv_sec().max(0) as u64, ts.tv_nsec().max(0) as u32))
            .unwrap_or_default()
    }

    #[cfg(not(unix))]
    pub fn now() -> Self {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        Self::from(EPOCH.get_or_init(Instant::now).elapsed())
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: MonotonicTime) -> Duration {
        self.as_duration().saturating_sub(earlier.as_duration())
    }
}

impl From<Duration> for MonotonicTime {
    fn from(d: Duration) -> Self {
        Self::new(d.as_secs(), d.subsec_nanos())
    }
}

impl fmt::Display for MonotonicTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}
