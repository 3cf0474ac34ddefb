//! Value transfer seam.
//!
//! Withdrawals pay out through this trait. The engine zeroes the internal
//! balance *before* invoking the transfer and compensates with a restore if
//! the transfer fails, so an implementation can never authorize more value
//! than was present at the first read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use vouch_core::{Address, Amount};

/// Errors from the value transfer primitive.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// The recipient cannot accept value (or the underlying channel failed).
    #[error("transfer rejected: {reason}")]
    Rejected { reason: String },
}

/// Moves native currency units to a recipient address.
pub trait ValueTransfer: Send + Sync {
    fn transfer(&self, to: &Address, amount: Amount) -> Result<(), TransferError>;
}

/// Recording test double for [`ValueTransfer`].
///
/// Records every successful transfer and can be armed to fail the next
/// calls, for exercising the withdrawal rollback path.
#[derive(Debug, Default)]
pub struct MockTransfer {
    sent: Mutex<Vec<(Address, Amount)>>,
    fail: AtomicBool,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent transfers fail until [`Self::succeed`] is called.
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn succeed(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }

    /// Snapshot of all completed transfers, in order.
    pub fn sent(&self) -> Vec<(Address, Amount)> {
        self.sent.lock().expect("mock transfer lock").clone()
    }
}

impl ValueTransfer for MockTransfer {
    fn transfer(&self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransferError::Rejected {
                reason: "mock transfer armed to fail".to_string(),
            });
        }
        self.sent
            .lock()
            .expect("mock transfer lock")
            .push((*to, amount));
        Ok(())
    }
}
