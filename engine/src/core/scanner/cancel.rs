use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::{CoreError, CoreResult};

/// Token for cooperative cancellation of a scan.
///
/// Checked between directory listings. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// `Err(ScanCancelled)` once cancellation was requested
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::ScanCancelled)
        } else {
            Ok(())
        }
    }
}
