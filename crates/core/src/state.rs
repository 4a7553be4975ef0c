use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide cooperative cancellation signal.
///
/// The orchestrator is the only writer; every long-running loop checks the
/// flag at its iteration boundary and exits cleanly when it flips. Cloning is
/// cheap and shares the underlying flag.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Re-arms the flag for the next cycle.
    pub fn reset(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
