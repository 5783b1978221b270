use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::error::EventError;
use super::events::Event;
use super::node::EventNode;

/// A subscriber's read position in a room's shared event log
///
/// Each cursor counts itself into the room's open reader total while open.
/// The count is released exactly once, on [`SharedCursor::close`], on the
/// first failed read, or on drop.
pub struct SharedCursor {
    node: Arc<EventNode>,
    open_readers: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl SharedCursor {
    pub(crate) fn new(node: Arc<EventNode>, open_readers: Arc<AtomicUsize>) -> Self {
        open_readers.fetch_add(1, Ordering::AcqRel);
        Self {
            node,
            open_readers,
            closed: AtomicBool::new(false),
        }
    }

    /// Waits for the next event in the room
    ///
    /// Returns [`EventError::Closed`] when the cursor fell behind the room's
    /// buffer or the room was closed, and [`EventError::Cancelled`] when
    /// `cancel` fires first. Either way the cursor is closed afterwards.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Event, EventError> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }

        let result = match self.node.wait_for_next(cancel).await {
            Ok(next) => match next.event().cloned() {
                Some(event) => {
                    self.node = next;
                    Ok(event)
                }
                None => Err(EventError::unexpected("resolved node without event")),
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.open_readers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for SharedCursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SharedCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCursor")
            .field("closed", &self.is_closed())
            .finish()
    }
}
