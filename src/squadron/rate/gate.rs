//! Process-wide concurrency gate for outbound LLM calls.
//!
//! A FIFO semaphore with a configured capacity (default 12).  Acquisition
//! blocks until a slot frees up or the caller's deadline elapses; the permit
//! releases on drop, so no code path can leak a slot.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::squadron::error::FailureKind;

/// Default cap on simultaneous outbound LLM calls.
pub const DEFAULT_CAPACITY: usize = 12;

/// Slot handle; dropping it returns the slot to the gate.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

pub struct GlobalGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl GlobalGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a slot, FIFO across callers.
    ///
    /// Returns [`FailureKind::CancelledByCaller`] if `deadline` passes first;
    /// a timed-out waiter leaves the queue without consuming a permit.
    pub async fn acquire(&self, deadline: Instant) -> Result<GatePermit, FailureKind> {
        let acquired =
            tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned()).await;
        match acquired {
            Ok(Ok(permit)) => Ok(GatePermit { _permit: permit }),
            // The semaphore is never closed; treat it like cancellation anyway.
            Ok(Err(_)) => Err(FailureKind::CancelledByCaller),
            Err(_) => Err(FailureKind::CancelledByCaller),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
