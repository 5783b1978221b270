use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use confa_rtc::event::{
    Event, EventEmitter, EventError, FeedCursor, MemoryEventStore, Watcher,
};
use confa_rtc::peer::{Downlink, Signal, SignalError, SignalMessage, SocketError};

// ============================================================================
// Upstream feed
// ============================================================================

/// Watcher over a [`MemoryEventStore`] that counts feeds opened and closed
#[derive(Clone)]
pub struct CountingWatcher {
    store: Arc<MemoryEventStore>,
    watches: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_watch: Arc<AtomicBool>,
    close_delay: Duration,
}

impl CountingWatcher {
    pub fn new(store: Arc<MemoryEventStore>) -> Self {
        Self {
            store,
            watches: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_watch: Arc::new(AtomicBool::new(false)),
            close_delay: Duration::ZERO,
        }
    }

    /// Makes every feed take `delay` to close
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn watches(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes every following `watch` fail with a feed error
    pub fn fail_watches(&self) {
        self.fail_watch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Watcher for CountingWatcher {
    async fn watch(&self, room_id: Uuid) -> Result<Box<dyn FeedCursor>, EventError> {
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(EventError::feed("store unavailable"));
        }
        let inner = self.store.watch(room_id).await?;
        self.watches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingFeed {
            inner,
            closes: Arc::clone(&self.closes),
            close_delay: self.close_delay,
        }))
    }
}

struct CountingFeed {
    inner: Box<dyn FeedCursor>,
    closes: Arc<AtomicUsize>,
    close_delay: Duration,
}

#[async_trait]
impl FeedCursor for CountingFeed {
    async fn next(&mut self) -> Result<Event, EventError> {
        self.inner.next().await
    }

    async fn close(&mut self) -> Result<(), EventError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// Emitter that rejects every event
pub struct FailingEmitter;

#[async_trait]
impl EventEmitter for FailingEmitter {
    async fn emit(&self, _event: Event) -> Result<(), EventError> {
        Err(EventError::feed("store unavailable"))
    }
}

// ============================================================================
// Downlink
// ============================================================================

/// How a [`MockDownlink`] answers pings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingBehavior {
    Answer,
    Fail,
    /// Never answers, so only the ping timeout ends it
    Hang,
}

pub struct MockDownlink {
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
    ping: PingBehavior,
    pings: AtomicUsize,
    closes: std::sync::Mutex<Vec<(u16, String)>>,
}

/// Client end of a [`MockDownlink`]
pub struct MockClient {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MockDownlink {
    pub fn new(ping: PingBehavior) -> (Arc<Self>, MockClient) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let downlink = Arc::new(Self {
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            ping,
            pings: AtomicUsize::new(0),
            closes: std::sync::Mutex::new(Vec::new()),
        });
        let client = MockClient {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        };
        (downlink, client)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downlink for MockDownlink {
    async fn send(&self, frame: String) -> Result<(), SocketError> {
        self.outbound
            .send(frame)
            .map_err(|_| SocketError::SendFailed("client gone".to_string()))
    }

    async fn receive(&self) -> Result<String, SocketError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(SocketError::ConnectionClosed)
    }

    async fn ping(&self) -> Result<(), SocketError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.ping {
            PingBehavior::Answer => Ok(()),
            PingBehavior::Fail => Err(SocketError::SendFailed("ping refused".to_string())),
            PingBehavior::Hang => std::future::pending().await,
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        self.closes.lock().unwrap().push((code, reason.to_string()));
        Ok(())
    }
}

impl MockClient {
    pub fn send(&self, frame: serde_json::Value) {
        self.inbound
            .as_ref()
            .expect("client already disconnected")
            .send(frame.to_string())
            .expect("downlink dropped");
    }

    pub fn send_raw(&self, frame: &str) {
        self.inbound
            .as_ref()
            .expect("client already disconnected")
            .send(frame.to_string())
            .expect("downlink dropped");
    }

    /// Hangs up; the session sees `ConnectionClosed` on its next receive
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Next frame the session wrote, parsed as JSON
    pub async fn next_frame(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a downlink frame")
            .expect("downlink dropped before sending a frame");
        serde_json::from_str(&frame).expect("downlink frame is not JSON")
    }

    pub async fn assert_no_frame(&mut self, within: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(within, self.outbound.recv()).await {
            panic!("unexpected downlink frame: {frame}");
        }
    }
}

// ============================================================================
// Signal
// ============================================================================

pub struct MockSignal {
    inbound: Mutex<mpsc::UnboundedReceiver<Result<SignalMessage, SignalError>>>,
    sent: Arc<std::sync::Mutex<Vec<SignalMessage>>>,
    closes: Arc<AtomicUsize>,
}

/// Media service end of a [`MockSignal`]
pub struct MockMediaService {
    inbound: Option<mpsc::UnboundedSender<Result<SignalMessage, SignalError>>>,
    sent: Arc<std::sync::Mutex<Vec<SignalMessage>>>,
    closes: Arc<AtomicUsize>,
}

impl MockSignal {
    pub fn new() -> (Box<dyn Signal>, MockMediaService) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let signal = Box::new(Self {
            inbound: Mutex::new(rx),
            sent: Arc::clone(&sent),
            closes: Arc::clone(&closes),
        });
        let service = MockMediaService {
            inbound: Some(tx),
            sent,
            closes,
        };
        (signal, service)
    }
}

#[async_trait]
impl Signal for MockSignal {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn receive(&self) -> Result<SignalMessage, SignalError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(SignalError::Closed))
    }

    async fn close(&self) -> Result<(), SignalError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MockMediaService {
    pub fn push(&self, message: Result<SignalMessage, SignalError>) {
        self.inbound
            .as_ref()
            .expect("media service already hung up")
            .send(message)
            .expect("signal dropped");
    }

    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
