use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Readiness flag for outbound substitution.
///
/// Starts closed and opens once, on the first inbound packet seen while
/// substitution is active. It never closes again. Each adapter owns its own
/// gate; clones share it between the receive callback and the send path.
#[derive(Default, Debug, Clone)]
pub struct Gate {
    open: Arc<AtomicBool>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate. Returns `true` only for the call that opened it.
    pub fn open(&self) -> bool {
        !self.open.swap(true, Ordering::AcqRel)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
