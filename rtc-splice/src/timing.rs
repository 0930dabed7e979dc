//! Bounded in-memory log of exchange timestamps.
//!
//! Each exchange appends one `(tag, time)` record. The log holds at most
//! `capacity` records; once full, further records are dropped and only
//! counted. At teardown the log is written once as plain text, one
//! `<tag> <seconds>.<nanoseconds>` line per record in append order, and
//! sealed: later flushes do nothing and later appends are dropped.

use shared::MonotonicTime;
use shared::error::Result;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Default number of records kept.
pub const DEFAULT_TIMING_CAPACITY: usize = 10_000;

/// Which exchange step a record marks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpTag {
    /// A payload was published to the outbound channel.
    Capture,
    /// A payload was overwritten with a message from the inbound channel.
    Substitute,
}

impl OpTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTag::Capture => "capture",
            OpTag::Substitute => "substitute",
        }
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    pub tag: OpTag,
    pub at: MonotonicTime,
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag, self.at)
    }
}

#[derive(Default)]
struct LogState {
    records: Vec<TimingRecord>,
    dropped: u64,
    sealed: bool,
}

pub struct TimingLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl Default for TimingLog {
    fn default() -> Self {
        Self::new(DEFAULT_TIMING_CAPACITY)
    }
}

impl TimingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LogState {
                records: Vec::with_capacity(capacity),
                ..Default::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a record stamped with the current monotonic time.
    pub fn record_now(&self, tag: OpTag) {
        self.record(tag, MonotonicTime::now());
    }

    /// Appends a record, or drops it silently if the log is full or sealed.
    pub fn record(&self, tag: OpTag, at: MonotonicTime) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.sealed || state.records.len() >= self.capacity {
            state.dropped += 1;
            return;
        }
        state.records.push(TimingRecord { tag, at });
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records dropped because the log was full or sealed.
    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|s| s.dropped).unwrap_or(0)
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().map(|s| s.sealed).unwrap_or(true)
    }

    pub fn records(&self) -> Vec<TimingRecord> {
        self.state
            .lock()
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    /// Writes every record to `writer` and seals the log.
    ///
    /// Returns the number of lines written, or `None` if the log was already sealed.
    pub fn flush_to<W: Write>(&self, writer: &mut W) -> Result<Option<usize>> {
        self.seal_and_write(|| Ok(writer))
    }

    /// Writes every record to the file at `path`, truncating it, and seals the log.
    ///
    /// Does not touch the file if the log was already sealed.
    pub fn flush(&self, path: &Path) -> Result<Option<usize>> {
        let written = self.seal_and_write(|| Ok(BufWriter::new(File::create(path)?)))?;
        if let Some(n) = written {
            log::debug!("wrote {} timing records to {}", n, path.display());
        }
        Ok(written)
    }

    // The lock is held until the writer is flushed, so only the caller that
    // seals the log ever opens its destination.
    fn seal_and_write<W, F>(&self, open: F) -> Result<Option<usize>>
    where
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        let mut state = self.state.lock()?;
        if state.sealed {
            return Ok(None);
        }
        state.sealed = true;

        let records = std::mem::take(&mut state.records);
        let mut writer = open()?;
        for record in &records {
            writeln!(writer, "{}", record)?;
        }
        writer.flush()?;
        Ok(Some(records.len()))
    }
}
