//! Pending Delivery Queue
//!
//! Ordered handoff buffer for events whose handler lives on the foreground
//! thread while the emitter runs on the background scheduler. Appended
//! from the background side, drained exclusively by the foreground thread,
//! global FIFO across all conversations.
//!
//! Entries carry the handler itself, not just the conversation id: a
//! conversation may complete (and unregister) while deliveries for it are
//! still queued, and those must still reach the handler in order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;

use super::registry::{ConversationId, Handler};

/// One queued cross-context delivery.
#[derive(Clone, Debug)]
pub(crate) struct PendingDelivery {
    pub(crate) handler: Handler,
    pub(crate) id: ConversationId,
    pub(crate) event: Event,
}

/// FIFO queue of deliveries awaiting foreground execution.
#[derive(Clone, Default)]
pub(crate) struct PendingQueue {
    inner: Arc<Mutex<VecDeque<PendingDelivery>>>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one delivery. Safe from any thread.
    pub(crate) fn push(&self, delivery: PendingDelivery) {
        self.inner.lock().push_back(delivery);
    }

    /// Take a snapshot of everything currently queued, leaving the queue
    /// empty. Entries appended concurrently land in the next snapshot, so
    /// one drain does a bounded amount of work.
    pub(crate) fn take_all(&self) -> VecDeque<PendingDelivery> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
