use async_trait::async_trait;
use uuid::Uuid;

use super::error::EventError;
use super::events::Event;

/// Upstream change feed of a single room
///
/// Implementations produce events in one total order per room and return
/// [`EventError::Closed`] once exhausted. `next` is cancelled by dropping
/// the returned future.
#[async_trait]
pub trait FeedCursor: Send {
    async fn next(&mut self) -> Result<Event, EventError>;

    async fn close(&mut self) -> Result<(), EventError>;
}

/// Source of per-room change feeds
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn watch(&self, room_id: Uuid) -> Result<Box<dyn FeedCursor>, EventError>;
}

/// Writer side of the event store
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: Event) -> Result<(), EventError>;
}
