use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::event::{Event, EventEmitter, EventError, SharedCursor, PEER_MESSAGE, PEER_STATE};

use super::error::{PeerError, SocketError};
use super::messages::{Message, PeerMessage, PeerState, RoomEvent};
use super::signal::{Signal, SignalError};
use super::socket::{Downlink, CLOSE_NORMAL};

/// Timing of the downlink keepalive
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// How often the downlink is pinged
    pub ping_interval: Duration,
    /// How long a ping may wait for its answer
    pub ping_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

/// One connected participant of a room
///
/// A session pairs a downlink with a cursor into the room's shared event
/// stream and, for media-enabled peers, a signaling channel. [`PeerSession::serve`]
/// runs four loops side by side:
/// - downlink receive: client requests (signals, state updates, messages)
/// - downlink heartbeat: periodic ping, fatal on failure
/// - signal receive: media service signals forwarded to the client
/// - event forward: room events forwarded to the client
///
/// The first loop to finish cancels the others; the session then closes
/// its cursor, signaling channel and downlink.
pub struct PeerSession {
    peer: Peer,
    cursor: SharedCursor,
}

struct Peer {
    user_id: Uuid,
    room_id: Uuid,
    downlink: Arc<dyn Downlink>,
    emitter: Arc<dyn EventEmitter>,
    config: PeerConfig,
}

impl PeerSession {
    pub fn new(
        user_id: Uuid,
        room_id: Uuid,
        downlink: Arc<dyn Downlink>,
        cursor: SharedCursor,
        emitter: Arc<dyn EventEmitter>,
        config: PeerConfig,
    ) -> Self {
        Self {
            peer: Peer {
                user_id,
                room_id,
                downlink,
                emitter,
                config,
            },
            cursor,
        }
    }

    /// Serves the peer until a loop terminates or `shutdown` fires
    #[instrument(skip_all, fields(room_id = %self.peer.room_id, user_id = %self.peer.user_id))]
    pub async fn serve(self, signal: Option<Box<dyn Signal>>, shutdown: &CancellationToken) {
        let PeerSession { peer, mut cursor } = self;
        let cancel = shutdown.child_token();
        let signal = signal.as_deref();

        info!(media = signal.is_some(), "Peer session started");

        tokio::join!(
            supervise(&cancel, peer.serve_downlink(signal)),
            supervise(&cancel, peer.ping_downlink()),
            async {
                if let Some(signal) = signal {
                    supervise(&cancel, peer.serve_signal(signal)).await;
                }
            },
            supervise(&cancel, peer.serve_events(&mut cursor, &cancel)),
        );

        cursor.close();
        if let Some(signal) = signal {
            if let Err(e) = signal.close().await {
                warn!(error = %e, "Failed to close signal");
            }
        }
        if let Err(e) = peer.downlink.close(CLOSE_NORMAL, "Peer closed.").await {
            debug!(error = %e, "Downlink already closed");
        }
        info!("Peer session terminated");
    }
}

/// Runs one session loop; whichever way it ends, the sibling loops are cancelled
async fn supervise(cancel: &CancellationToken, task: impl Future<Output = ()>) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = task => {}
    }
    cancel.cancel();
}

impl Peer {
    async fn serve_downlink(&self, signal: Option<&dyn Signal>) {
        loop {
            match self.receive_downlink(signal).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Message from downlink rejected");
                }
                Err(PeerError::Socket(SocketError::ConnectionClosed)) => {
                    info!("Downlink disconnected");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to process downlink message");
                    return;
                }
            }
        }
    }

    async fn ping_downlink(&self) {
        let mut ticker = interval(self.config.ping_interval);
        loop {
            ticker.tick().await;
            let result = match timeout(self.config.ping_timeout, self.downlink.ping()).await {
                Ok(result) => result,
                Err(_) => Err(SocketError::PingTimeout),
            };
            if let Err(e) = result {
                error!(error = %e, "Downlink ping failed");
                return;
            }
        }
    }

    async fn serve_signal(&self, signal: &dyn Signal) {
        loop {
            let message = match signal.receive().await {
                Ok(message) => message,
                Err(SignalError::UnknownMessage(kind)) => {
                    debug!(kind = %kind, "Skipping unknown signal");
                    continue;
                }
                Err(SignalError::Closed) => {
                    debug!("Signal closed");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive signal");
                    return;
                }
            };

            debug!(kind = message.kind(), "Forwarding signal to downlink");
            if let Err(e) = self.write(&Message::signal(message)).await {
                error!(error = %e, "Failed to write signal to downlink");
                return;
            }
        }
    }

    async fn serve_events(&self, cursor: &mut SharedCursor, cancel: &CancellationToken) {
        loop {
            let event = match cursor.next(cancel).await {
                Ok(event) => event,
                Err(EventError::Cancelled) => {
                    debug!("Serving events cancelled");
                    return;
                }
                Err(EventError::Closed) => {
                    info!("Room event stream closed");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive event");
                    return;
                }
            };

            let event = match RoomEvent::try_from(event) {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Skipping unknown event");
                    continue;
                }
            };
            if let Err(e) = self.write(&Message::event(event)).await {
                error!(error = %e, "Failed to write event to downlink");
                return;
            }
        }
    }

    async fn receive_downlink(&self, signal: Option<&dyn Signal>) -> Result<(), PeerError> {
        let frame = self.downlink.receive().await?;
        let Message {
            request_id,
            payload,
            ..
        } = serde_json::from_str(&frame)?;

        if let (Some(message), Some(signal)) = (payload.signal, signal) {
            return Ok(signal.send(message).await?);
        }
        if let Some(state) = payload.state {
            let state = self.send_state(state).await?;
            return self
                .write(&Message::state(state).in_response_to(request_id))
                .await;
        }
        if let Some(message) = payload.peer_message {
            let event = RoomEvent::try_from(self.send_message(message).await?)?;
            return self
                .write(&Message::event(event).in_response_to(request_id))
                .await;
        }

        debug!("Skipping unknown message");
        Ok(())
    }

    async fn send_state(&self, state: PeerState) -> Result<PeerState, PeerError> {
        state.validate()?;
        let event = Event::new(
            self.room_id,
            self.user_id,
            PEER_STATE,
            serde_json::to_value(&state)?,
        );
        self.emitter.emit(event).await?;
        Ok(state)
    }

    async fn send_message(&self, message: PeerMessage) -> Result<Event, PeerError> {
        message.validate()?;
        let event = Event::new(
            self.room_id,
            self.user_id,
            PEER_MESSAGE,
            serde_json::to_value(&message)?,
        );
        self.emitter.emit(event.clone()).await?;
        Ok(event)
    }

    async fn write(&self, message: &Message) -> Result<(), PeerError> {
        let frame = serde_json::to_string(message)?;
        self.downlink.send(frame).await?;
        Ok(())
    }
}
