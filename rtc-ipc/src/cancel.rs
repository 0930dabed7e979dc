use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation flag shared between an adapter and its in-flight receives.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Default, Debug, Clone)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call performed the transition.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_and_sticky() {
        let a = Cancellation::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        assert!(a.cancel());
        assert!(b.is_cancelled());
        assert!(!b.cancel());
        assert!(a.is_cancelled());
    }
}
