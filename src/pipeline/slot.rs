//! Single-slot mailbox between the producer's delivery context and the
//! processing worker.
//!
//! At most one frame is ever pending. A publish displaces any unread frame
//! and never blocks; a take returns instantly or suspends on the condvar
//! until the next publish or close. Closing is the shutdown signal: waiters
//! wake, observe it and exit. Cancellation is cooperative, re-checked after
//! every wake.

use std::sync::{Condvar, Mutex, PoisonError};

use crate::capture::FrameBuffer;

#[derive(Default)]
struct SlotState {
    pending: Option<FrameBuffer>,
    closed: bool,
}

#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the pending frame and wake one waiter. Never blocks.
    ///
    /// Returns the buffer this publish displaced: the previously pending
    /// unread frame, or `frame` itself if the slot is closed. Either way the
    /// caller owes that buffer back to the producer before returning from
    /// its own delivery path.
    #[must_use = "the displaced buffer must be recycled to the producer"]
    pub fn publish(&self, frame: FrameBuffer) -> Option<FrameBuffer> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Some(frame);
        }
        let displaced = state.pending.replace(frame);
        self.available.notify_one();
        displaced
    }

    /// Take the pending frame, blocking until one is published.
    ///
    /// Returns `None` once the slot is closed; the closed state wins even
    /// over a pending frame, and every later call returns `None` without
    /// blocking.
    pub fn take_or_wait(&self) -> Option<FrameBuffer> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.pending.take() {
                return Some(frame);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the slot and wake every waiter. Idempotent. Any pending frame
    /// is discarded; at stop time the whole pool is being torn down with it.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.pending = None;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }
}
