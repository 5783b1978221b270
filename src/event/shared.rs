use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cursor::SharedCursor;
use super::error::EventError;
use super::feed::{FeedCursor, Watcher};
use super::room::RoomBuffer;

/// Process-wide registry of shared room streams
///
/// The first subscriber of a room lazily opens one upstream watch and one
/// puller task that feeds a [`RoomBuffer`]; every later subscriber of the
/// same room shares them. [`SharedWatcher::run`] periodically reclaims
/// rooms without readers.
pub struct SharedWatcher {
    watcher: Arc<dyn Watcher>,
    capacity: usize,
    rooms: RwLock<HashMap<Uuid, Arc<SharedRoom>>>,
    /// Closes of reclaimed rooms still in flight
    reclaims: Mutex<JoinSet<()>>,
    shutting_down: AtomicBool,
}

impl SharedWatcher {
    /// Creates a registry whose room buffers retain up to `capacity` events
    pub fn new(watcher: Arc<dyn Watcher>, capacity: usize) -> Self {
        Self {
            watcher,
            capacity,
            rooms: RwLock::new(HashMap::new()),
            reclaims: Mutex::new(JoinSet::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Opens a cursor at the live end of the room's event stream
    ///
    /// Fails only with [`EventError::ShuttingDown`] or an error from the
    /// upstream watch. A room retired or closed under the caller is replaced
    /// by a fresh entry and the subscription retried.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, room_id: Uuid) -> Result<SharedCursor, EventError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            if self.is_shutting_down() {
                return Err(EventError::ShuttingDown);
            }

            let room = self.get_or_create(room_id).await?;
            match room.open_cursor(self.watcher.as_ref(), self.capacity).await {
                Err(EventError::Closed) => {
                    debug!(
                        room_id = %room_id,
                        attempt = attempt,
                        "Room closed while subscribing, retrying"
                    );
                    self.remove_if_current(&room).await;
                }
                result => return result,
            }
        }
    }

    /// Runs the garbage collection cycle until `cancel` fires
    ///
    /// Each cycle snapshots rooms without readers, waits `gc_period`, then
    /// reclaims the candidates that still have no readers. Cancellation
    /// shuts the registry down before returning.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        gc_period: Duration,
    ) -> Result<(), EventError> {
        info!(
            gc_period_ms = gc_period.as_millis() as u64,
            capacity = self.capacity,
            "Starting shared watcher"
        );

        loop {
            if self.is_shutting_down() {
                return Err(EventError::ShuttingDown);
            }

            let candidates: Vec<Arc<SharedRoom>> = {
                let rooms = self.rooms.read().await;
                rooms
                    .values()
                    .filter(|room| room.open_readers() == 0)
                    .cloned()
                    .collect()
            };

            tokio::select! {
                _ = tokio::time::sleep(gc_period) => {}
                _ = cancel.cancelled() => {
                    info!("Shared watcher received shutdown signal");
                    self.shutdown().await;
                    return Ok(());
                }
            }

            if candidates.is_empty() {
                continue;
            }
            self.reclaim(candidates).await;
        }
    }

    /// Refuses new subscriptions, then closes every room and waits for their pullers
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let rooms: Vec<Arc<SharedRoom>> = {
            let mut rooms = self.rooms.write().await;
            rooms.drain().map(|(_, room)| room).collect()
        };

        info!(rooms = rooms.len(), "Shutting down shared watcher");
        join_all(rooms.iter().map(|room| async move {
            if let Err(e) = room.close().await {
                error!(room_id = %room.room_id, error = %e, "Failed to close room");
            }
        }))
        .await;

        let mut reclaims = std::mem::take(&mut *self.reclaims.lock().await);
        while let Some(result) = reclaims.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Reclaimed room close task failed");
            }
        }
        info!("Shared watcher shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of rooms currently registered
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Open readers of a registered room, `None` if the room is not registered
    pub async fn open_readers(&self, room_id: Uuid) -> Option<usize> {
        let rooms = self.rooms.read().await;
        rooms.get(&room_id).map(|room| room.open_readers())
    }

    async fn get_or_create(&self, room_id: Uuid) -> Result<Arc<SharedRoom>, EventError> {
        // Read lock first to keep lookups of existing rooms concurrent.
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&room_id) {
                return Ok(Arc::clone(room));
            }
        }

        let mut rooms = self.rooms.write().await;
        if self.is_shutting_down() {
            return Err(EventError::ShuttingDown);
        }
        // Another subscriber may have created it between the two locks.
        if let Some(room) = rooms.get(&room_id) {
            return Ok(Arc::clone(room));
        }

        debug!(room_id = %room_id, "Registering shared room");
        let room = Arc::new(SharedRoom::new(room_id));
        rooms.insert(room_id, Arc::clone(&room));
        Ok(room)
    }

    async fn remove_if_current(&self, room: &Arc<SharedRoom>) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(&room.room_id)
            .is_some_and(|current| Arc::ptr_eq(current, room))
        {
            rooms.remove(&room.room_id);
        }
    }

    async fn reclaim(&self, candidates: Vec<Arc<SharedRoom>>) {
        let mut rooms = self.rooms.write().await;
        let mut reclaims = self.reclaims.lock().await;
        while reclaims.try_join_next().is_some() {}

        for room in candidates {
            let registered = rooms
                .get(&room.room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &room));
            // A reader may have arrived since the snapshot.
            if !registered || !room.try_retire() {
                continue;
            }

            rooms.remove(&room.room_id);
            info!(room_id = %room.room_id, "Reclaiming idle room");
            reclaims.spawn(async move {
                if let Err(e) = room.close().await {
                    warn!(room_id = %room.room_id, error = %e, "Failed to close idle room");
                }
            });
        }
    }
}

/// Registry entry for one room
///
/// The buffer and puller are created lazily by the first subscriber. Once
/// retired, the entry hands out no more cursors.
struct SharedRoom {
    room_id: Uuid,
    buffer: OnceLock<Arc<RoomBuffer>>,
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    puller: Option<JoinHandle<Result<(), EventError>>>,
    retired: bool,
}

impl SharedRoom {
    fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            buffer: OnceLock::new(),
            state: Mutex::new(RoomState::default()),
        }
    }

    /// Starts the room on first use and opens a cursor while holding the room lock
    async fn open_cursor(
        &self,
        watcher: &dyn Watcher,
        capacity: usize,
    ) -> Result<SharedCursor, EventError> {
        let mut state = self.state.lock().await;
        if state.retired {
            return Err(EventError::Closed);
        }

        if let Some(buffer) = self.buffer.get() {
            return buffer.read_cursor();
        }

        let feed = watcher.watch(self.room_id).await?;
        let buffer = Arc::new(RoomBuffer::new(self.room_id, capacity));
        state.puller = Some(tokio::spawn(pull(Arc::clone(&buffer), feed)));
        let cursor = buffer.read_cursor();
        if self.buffer.set(buffer).is_err() {
            return Err(EventError::unexpected("room buffer started twice"));
        }
        cursor
    }

    fn open_readers(&self) -> usize {
        self.buffer.get().map_or(0, |buffer| buffer.open_readers())
    }

    /// Marks the room retired if nobody is subscribing to or reading from it
    fn try_retire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.retired || self.open_readers() != 0 {
            return false;
        }
        state.retired = true;
        true
    }

    /// Closes the buffer and waits for the puller to close the upstream feed
    async fn close(&self) -> Result<(), EventError> {
        let puller = {
            let mut state = self.state.lock().await;
            state.retired = true;
            state.puller.take()
        };

        if let Some(buffer) = self.buffer.get() {
            buffer.close();
        }

        match puller {
            Some(handle) => handle
                .await
                .map_err(|e| EventError::unexpected(format!("room puller panicked: {e}")))?,
            None => Ok(()),
        }
    }
}

/// Single writer of a room: pulls the upstream feed into the buffer
///
/// Any feed error closes the buffer so readers are not left waiting on a
/// dead room. The feed is closed exactly once, when the loop ends.
async fn pull(buffer: Arc<RoomBuffer>, mut feed: Box<dyn FeedCursor>) -> Result<(), EventError> {
    let room_id = buffer.room_id();
    info!(room_id = %room_id, "Room iteration started");

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = buffer.closed() => break Ok(()),
            next = feed.next() => next,
        };

        match next {
            Ok(event) => {
                debug!(room_id = %room_id, event_type = %event.event_type(), "Room event received");
                if let Err(e) = buffer.advance(event) {
                    break Err(e);
                }
            }
            Err(e) => break Err(e),
        }
    };

    buffer.close();
    match &result {
        Ok(()) | Err(EventError::Closed) => info!(room_id = %room_id, "Room closed"),
        Err(e) => error!(room_id = %room_id, error = %e, "Room iteration failed"),
    }

    feed.close().await
}
