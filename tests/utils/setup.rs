use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use confa_rtc::event::{Event, EventEmitter, MemoryEventStore, SharedWatcher};
use confa_rtc::peer::{PeerConfig, PeerSession, Signal};

use super::mocks::{CountingWatcher, MockClient, MockDownlink, PingBehavior};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub store: Arc<MemoryEventStore>,
    pub upstream: CountingWatcher,
    pub watcher: Arc<SharedWatcher>,
    pub room_id: Uuid,
    pub peer_config: PeerConfig,
}

pub struct TestSetupBuilder {
    capacity: usize,
    peer_config: PeerConfig,
    feed_close_delay: Duration,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            capacity: 30,
            peer_config: PeerConfig::default(),
            feed_close_delay: Duration::ZERO,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.peer_config = PeerConfig {
            ping_interval: interval,
            ping_timeout: timeout,
        };
        self
    }

    pub fn with_feed_close_delay(mut self, delay: Duration) -> Self {
        self.feed_close_delay = delay;
        self
    }

    pub fn build(self) -> TestSetup {
        let store = Arc::new(MemoryEventStore::new());
        let upstream =
            CountingWatcher::new(Arc::clone(&store)).with_close_delay(self.feed_close_delay);
        let watcher = Arc::new(SharedWatcher::new(
            Arc::new(upstream.clone()),
            self.capacity,
        ));

        TestSetup {
            store,
            upstream,
            watcher,
            room_id: Uuid::new_v4(),
            peer_config: self.peer_config,
        }
    }
}

impl TestSetup {
    pub async fn emit(&self, kind: &str, payload: serde_json::Value) -> Event {
        let event = Event::new(self.room_id, Uuid::new_v4(), kind, payload);
        self.store.emit(event.clone()).await.unwrap();
        event
    }

    /// Subscribes a new peer to the room and serves it on its own task
    pub async fn spawn_peer(
        &self,
        ping: PingBehavior,
        signal: Option<Box<dyn Signal>>,
    ) -> PeerHandle {
        self.spawn_peer_with_emitter(ping, signal, self.store.clone())
            .await
    }

    pub async fn spawn_peer_with_emitter(
        &self,
        ping: PingBehavior,
        signal: Option<Box<dyn Signal>>,
        emitter: Arc<dyn EventEmitter>,
    ) -> PeerHandle {
        let user_id = Uuid::new_v4();
        let cursor = self.watcher.subscribe(self.room_id).await.unwrap();
        let (downlink, client) = MockDownlink::new(ping);
        let session = PeerSession::new(
            user_id,
            self.room_id,
            downlink.clone(),
            cursor,
            emitter,
            self.peer_config.clone(),
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { session.serve(signal, &shutdown).await }
        });

        PeerHandle {
            user_id,
            client,
            downlink,
            shutdown,
            task,
        }
    }
}

pub struct PeerHandle {
    pub user_id: Uuid,
    pub client: MockClient,
    pub downlink: Arc<MockDownlink>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<()>,
}

impl PeerHandle {
    /// Waits for the session to terminate on its own
    pub async fn terminated(self) -> Arc<MockDownlink> {
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("peer session did not terminate")
            .expect("peer session panicked");
        self.downlink
    }
}
