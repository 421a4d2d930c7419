//! Per-sender admission: at most one routing decision in flight per sender.
//!
//! A sender is busy from a successful [`DispatchQueue::try_admit`] until the returned
//! [`DispatchPermit`] is released or dropped. Overlapping messages are rejected, never
//! queued. Different senders never block each other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::channels::SenderId;

/// Set of busy senders with atomic test-and-insert.
#[derive(Clone, Default)]
pub struct DispatchQueue {
    busy: Arc<Mutex<HashSet<SenderId>>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // The set is only touched in short non-async sections, so a poisoned lock still holds
    // a consistent set.
    fn lock(&self) -> MutexGuard<'_, HashSet<SenderId>> {
        self.busy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `sender` busy. None if it already is.
    pub fn try_admit(&self, sender: &SenderId) -> Option<DispatchPermit> {
        if !self.lock().insert(sender.clone()) {
            log::debug!("dispatch: {} already in flight", sender);
            return None;
        }
        Some(DispatchPermit {
            queue: self.clone(),
            sender: sender.clone(),
        })
    }

    fn release(&self, sender: &SenderId) {
        self.lock().remove(sender);
    }

    pub fn is_busy(&self, sender: &SenderId) -> bool {
        self.lock().contains(sender)
    }

    /// Number of senders currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof of admission. Releases the sender exactly once, on [`release`](Self::release) or drop.
pub struct DispatchPermit {
    queue: DispatchQueue,
    sender: SenderId,
}

impl DispatchPermit {
    pub fn release(self) {}
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.queue.release(&self.sender);
    }
}

impl std::fmt::Debug for DispatchPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPermit")
            .field("sender", &self.sender)
            .finish()
    }
}
