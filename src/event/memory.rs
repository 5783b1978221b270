use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::error::EventError;
use super::events::Event;
use super::feed::{EventEmitter, FeedCursor, Watcher};

/// Default per-room channel capacity for live watchers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-memory append-only event store for development and testing
///
/// Every room keeps its full history plus a broadcast channel that feeds
/// live watchers. A watcher that lags behind the channel receives a feed
/// error, the same way a dropped change stream would surface.
pub struct MemoryEventStore {
    rooms: RwLock<HashMap<Uuid, RoomLog>>,
    channel_capacity: usize,
}

struct RoomLog {
    events: Vec<Event>,
    sender: Option<broadcast::Sender<Event>>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    /// Returns the stored history of a room in append order
    pub async fn fetch(&self, room_id: Uuid) -> Vec<Event> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&room_id)
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    /// Ends every live feed of a room; later watches start a new feed
    pub async fn close_room(&self, room_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(log) = rooms.get_mut(&room_id) {
            log.sender = None;
            debug!(room_id = %room_id, "Closed room feed");
        }
    }

    fn new_log(&self) -> RoomLog {
        RoomLog {
            events: Vec::new(),
            sender: Some(broadcast::channel(self.channel_capacity).0),
        }
    }
}

#[async_trait]
impl EventEmitter for MemoryEventStore {
    #[instrument(skip(self, event), fields(room_id = %event.room_id, event_type = %event.event_type()))]
    async fn emit(&self, event: Event) -> Result<(), EventError> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(event.room_id).or_insert_with(|| self.new_log());

        log.events.push(event.clone());
        if let Some(sender) = &log.sender {
            match sender.send(event) {
                Ok(receivers) => debug!(receivers = receivers, "Event appended"),
                Err(_) => debug!("Event appended with no watchers"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Watcher for MemoryEventStore {
    async fn watch(&self, room_id: Uuid) -> Result<Box<dyn FeedCursor>, EventError> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(room_id).or_insert_with(|| self.new_log());
        let sender = log
            .sender
            .get_or_insert_with(|| broadcast::channel(self.channel_capacity).0);

        debug!(room_id = %room_id, "Watching room feed");
        Ok(Box::new(MemoryFeedCursor {
            room_id,
            receiver: sender.subscribe(),
            closed: false,
        }))
    }
}

/// Live feed over a [`MemoryEventStore`] room
pub struct MemoryFeedCursor {
    room_id: Uuid,
    receiver: broadcast::Receiver<Event>,
    closed: bool,
}

#[async_trait]
impl FeedCursor for MemoryFeedCursor {
    async fn next(&mut self) -> Result<Event, EventError> {
        if self.closed {
            return Err(EventError::Closed);
        }
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Closed) => Err(EventError::Closed),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(EventError::feed(format!(
                "room {} feed lagged by {} events",
                self.room_id, skipped
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), EventError> {
        self.closed = true;
        Ok(())
    }
}
