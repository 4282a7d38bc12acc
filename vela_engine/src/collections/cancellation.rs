use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single cancellation source shared across the feed driver, exchange
/// workers and the scheduler. Cancellation is cooperative, every blocking
/// primitive polls the token inside its wait loop and exits cleanly.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
