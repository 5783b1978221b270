use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use super::cursor::SharedCursor;
use super::error::EventError;
use super::events::Event;
use super::node::EventNode;

/// Bounded window over one room's event log
///
/// The buffer keeps at most `capacity` resolved events behind the head.
/// When a new event arrives at full capacity the oldest node is evicted, so
/// readers that fall more than `capacity` events behind observe
/// [`EventError::Closed`] instead of blocking the writer.
pub struct RoomBuffer {
    room_id: Uuid,
    capacity: usize,
    chain: Mutex<Chain>,
    open_readers: Arc<AtomicUsize>,
    closing: CancellationToken,
}

struct Chain {
    head: Arc<EventNode>,
    tail: Arc<EventNode>,
    len: usize,
    closed: bool,
}

impl RoomBuffer {
    pub fn new(room_id: Uuid, capacity: usize) -> Self {
        let seed = EventNode::seed();
        Self {
            room_id,
            capacity,
            chain: Mutex::new(Chain {
                head: Arc::clone(&seed),
                tail: seed,
                len: 0,
                closed: false,
            }),
            open_readers: Arc::new(AtomicUsize::new(0)),
            closing: CancellationToken::new(),
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Opens a cursor positioned at the current head
    ///
    /// The cursor observes every event appended after this call.
    pub fn read_cursor(&self) -> Result<SharedCursor, EventError> {
        let chain = self.lock_chain();
        if chain.closed {
            return Err(EventError::Closed);
        }
        Ok(SharedCursor::new(
            Arc::clone(&chain.head),
            Arc::clone(&self.open_readers),
        ))
    }

    /// Appends `event`, evicting the oldest node when the buffer is full
    pub fn advance(&self, event: Event) -> Result<(), EventError> {
        let mut chain = self.lock_chain();
        if chain.closed {
            return Err(EventError::Closed);
        }

        let next = chain.head.resolve(event)?;
        chain.head = next;

        if chain.len < self.capacity {
            chain.len += 1;
        } else {
            let tail = chain
                .tail
                .next()
                .ok_or_else(|| EventError::unexpected("tail node has no successor"))?;
            chain.tail.evict();
            chain.tail = tail;
        }
        Ok(())
    }

    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::Acquire)
    }

    /// Number of events currently retained
    pub fn len(&self) -> usize {
        self.lock_chain().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes reachable from tail to head, the unresolved head included
    pub fn live_nodes(&self) -> usize {
        let chain = self.lock_chain();
        let mut count = 1;
        let mut node = Arc::clone(&chain.tail);
        while !Arc::ptr_eq(&node, &chain.head) {
            match node.next() {
                Some(next) => node = next,
                None => break,
            }
            count += 1;
        }
        count
    }

    /// Evicts every retained node and wakes all waiting cursors
    ///
    /// Safe to call repeatedly and concurrently with [`RoomBuffer::advance`].
    /// Also signals the room's puller to stop and close the upstream feed.
    pub fn close(&self) {
        let mut chain = self.lock_chain();
        if chain.closed {
            return;
        }
        chain.closed = true;

        let mut node = Arc::clone(&chain.tail);
        loop {
            let next = node.next();
            node.evict();
            match next {
                Some(next) => node = next,
                None => break,
            }
        }
        chain.head.release();
        chain.tail = Arc::clone(&chain.head);
        chain.len = 0;
        drop(chain);

        self.closing.cancel();
        debug!(room_id = %self.room_id, "Room buffer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock_chain().closed
    }

    /// Resolves once [`RoomBuffer::close`] has been called
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closing.cancelled()
    }

    fn lock_chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RoomBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomBuffer")
            .field("room_id", &self.room_id)
            .field("capacity", &self.capacity)
            .field("open_readers", &self.open_readers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn event(room_id: Uuid, kind: &str) -> Event {
        Event::new(room_id, Uuid::new_v4(), kind, serde_json::Value::Null)
    }

    fn append(buffer: &RoomBuffer, kinds: &[&str]) {
        for kind in kinds {
            buffer.advance(event(buffer.room_id(), kind)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_cursor_reads_events_in_order() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 10);
        let mut cursor = buffer.read_cursor().unwrap();

        append(&buffer, &["a", "b", "c"]);

        let cancel = CancellationToken::new();
        for expected in ["a", "b", "c"] {
            assert_eq!(cursor.next(&cancel).await.unwrap().event_type(), expected);
        }
    }

    #[tokio::test]
    async fn test_cursor_starts_at_head() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 10);
        append(&buffer, &["a", "b"]);

        let mut cursor = buffer.read_cursor().unwrap();
        append(&buffer, &["c"]);

        let cancel = CancellationToken::new();
        assert_eq!(cursor.next(&cancel).await.unwrap().event_type(), "c");
    }

    #[rstest]
    #[case(1, 5)]
    #[case(3, 3)]
    #[case(3, 10)]
    #[case(30, 100)]
    fn test_live_nodes_stay_bounded(#[case] capacity: usize, #[case] appends: usize) {
        let buffer = RoomBuffer::new(Uuid::new_v4(), capacity);
        for _ in 0..appends {
            buffer.advance(event(buffer.room_id(), "a")).unwrap();
            assert!(buffer.len() <= capacity);
            assert!(buffer.live_nodes() <= capacity + 1);
        }
        assert_eq!(buffer.len(), capacity.min(appends));
        assert_eq!(buffer.live_nodes(), capacity.min(appends) + 1);
    }

    #[tokio::test]
    async fn test_slow_cursor_is_closed_after_eviction() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 3);
        let mut cursor = buffer.read_cursor().unwrap();

        append(&buffer, &["a", "b", "c", "d"]);

        let cancel = CancellationToken::new();
        assert_eq!(cursor.next(&cancel).await.unwrap_err(), EventError::Closed);
        assert_eq!(buffer.open_readers(), 0);
    }

    #[tokio::test]
    async fn test_stalled_cursor_does_not_pin_evicted_nodes() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 2);
        let mut stalled = buffer.read_cursor().unwrap();

        buffer.advance(event(buffer.room_id(), "first")).unwrap();
        let first = Arc::downgrade(&buffer.lock_chain().head);
        for _ in 0..10_000 {
            buffer.advance(event(buffer.room_id(), "a")).unwrap();
        }

        assert_eq!(buffer.live_nodes(), 3);
        assert!(
            first.upgrade().is_none(),
            "evicted nodes must be freed while a stalled cursor exists"
        );

        let cancel = CancellationToken::new();
        assert_eq!(stalled.next(&cancel).await.unwrap_err(), EventError::Closed);
    }

    #[tokio::test]
    async fn test_cursor_within_window_keeps_reading() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 3);
        let mut cursor = buffer.read_cursor().unwrap();

        append(&buffer, &["a", "b", "c"]);

        let cancel = CancellationToken::new();
        assert_eq!(cursor.next(&cancel).await.unwrap().event_type(), "a");
        assert_eq!(cursor.next(&cancel).await.unwrap().event_type(), "b");
    }

    #[rstest]
    #[case(5, 0)]
    #[case(5, 3)]
    #[case(5, 5)]
    fn test_open_readers_counts_cursors(#[case] opened: usize, #[case] closed: usize) {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 3);
        let cursors: Vec<_> = (0..opened).map(|_| buffer.read_cursor().unwrap()).collect();

        for cursor in cursors.iter().take(closed) {
            cursor.close();
            cursor.close();
        }

        assert_eq!(buffer.open_readers(), opened - closed);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_cursors() {
        let buffer = Arc::new(RoomBuffer::new(Uuid::new_v4(), 3));
        let mut cursor = buffer.read_cursor().unwrap();

        let waiter = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            cursor.next(&cancel).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.close();

        assert_eq!(waiter.await.unwrap().unwrap_err(), EventError::Closed);
        assert_eq!(buffer.open_readers(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let buffer = RoomBuffer::new(Uuid::new_v4(), 3);
        append(&buffer, &["a", "b"]);

        buffer.close();
        buffer.close();

        assert!(buffer.is_closed());
        assert!(buffer.is_empty());
        assert_eq!(
            buffer.advance(event(buffer.room_id(), "c")).unwrap_err(),
            EventError::Closed
        );
        assert_eq!(buffer.read_cursor().unwrap_err(), EventError::Closed);
        // Resolves immediately once closed.
        buffer.closed().await;
    }

    #[tokio::test]
    async fn test_close_races_with_advance() {
        let buffer = Arc::new(RoomBuffer::new(Uuid::new_v4(), 8));
        let mut cursor = buffer.read_cursor().unwrap();

        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut appended = 0;
                while buffer.advance(event(buffer.room_id(), "a")).is_ok() {
                    appended += 1;
                    tokio::task::yield_now().await;
                }
                appended
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        buffer.close();
        writer.await.unwrap();

        let cancel = CancellationToken::new();
        let mut outcome = cursor.next(&cancel).await;
        while outcome.is_ok() {
            outcome = cursor.next(&cancel).await;
        }
        assert_eq!(outcome.unwrap_err(), EventError::Closed);
    }
}
