use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::error::EventError;
use super::events::Event;

/// One slot of a room's linked event log
///
/// A node starts pending. The single writer resolves it exactly once by
/// attaching the successor and opening the ready gate, which wakes every
/// waiting cursor at once. Eviction is terminal: a reader waiting on or
/// arriving at an evicted node fails with [`EventError::Closed`], and the
/// link to the successor is cut so a stalled cursor cannot pin the rest of
/// the log.
pub(crate) struct EventNode {
    event: Option<Event>,
    next: Mutex<Option<Arc<EventNode>>>,
    ready: AtomicBool,
    ready_notify: Notify,
    evicted: AtomicBool,
}

impl EventNode {
    /// The seed node of a chain. It carries no event and is never returned to readers.
    pub(crate) fn seed() -> Arc<Self> {
        Arc::new(Self::with_event(None))
    }

    fn with_event(event: Option<Event>) -> Self {
        Self {
            event,
            next: Mutex::new(None),
            ready: AtomicBool::new(false),
            ready_notify: Notify::new(),
            evicted: AtomicBool::new(false),
        }
    }

    pub(crate) fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    /// The successor, `None` while pending or once evicted
    pub(crate) fn next(&self) -> Option<Arc<EventNode>> {
        self.lock_next().clone()
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Waits until the node is resolved, evicted or `cancel` fires
    pub(crate) async fn wait_for_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<EventNode>, EventError> {
        if self.is_evicted() {
            return Err(EventError::Closed);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EventError::Cancelled),
            _ = self.ready() => {
                // Evicted while waiting, or released by close without a successor.
                if self.is_evicted() {
                    return Err(EventError::Closed);
                }
                self.next().ok_or(EventError::Closed)
            }
        }
    }

    /// Links a new node holding `event` and wakes all waiters
    pub(crate) fn resolve(&self, event: Event) -> Result<Arc<EventNode>, EventError> {
        if self.ready.load(Ordering::Acquire) {
            return Err(EventError::unexpected("event node resolved twice"));
        }

        let node = Arc::new(Self::with_event(Some(event)));
        {
            let mut next = self.lock_next();
            if next.is_some() {
                return Err(EventError::unexpected("event node resolved twice"));
            }
            *next = Some(Arc::clone(&node));
        }
        self.release();
        Ok(node)
    }

    /// Opens the ready gate without touching the successor
    pub(crate) fn release(&self) {
        self.ready.store(true, Ordering::Release);
        self.ready_notify.notify_waiters();
    }

    /// Marks the node terminal and drops its link to the successor
    pub(crate) fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        let unlinked = self.lock_next().take();
        drop(unlinked);
    }

    async fn ready(&self) {
        loop {
            let notified = self.ready_notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.ready.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    fn lock_next(&self) -> MutexGuard<'_, Option<Arc<EventNode>>> {
        self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventNode {
    // Unlink iteratively so a long chain held by a stale cursor cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = take_next(&mut self.next);
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = take_next(&mut node.next),
                Err(_) => break,
            }
        }
    }
}

fn take_next(next: &mut Mutex<Option<Arc<EventNode>>>) -> Option<Arc<EventNode>> {
    next.get_mut().unwrap_or_else(PoisonError::into_inner).take()
}

impl std::fmt::Debug for EventNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNode")
            .field("event_id", &self.event.as_ref().map(|event| event.id))
            .field("ready", &self.ready.load(Ordering::Acquire))
            .field("evicted", &self.is_evicted())
            .finish()
    }
}
