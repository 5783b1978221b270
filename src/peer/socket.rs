use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};

use super::error::SocketError;

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// Simple duplex connection abstraction - all we care about is send/receive
///
/// Methods take `&self` so the session's loops can send and receive
/// concurrently on the same connection.
#[async_trait]
pub trait Downlink: Send + Sync {
    /// Send a text frame to the client
    async fn send(&self, frame: String) -> Result<(), SocketError>;

    /// Receive the next text frame, `ConnectionClosed` once the client is gone
    async fn receive(&self) -> Result<String, SocketError>;

    /// Round-trip a keepalive; resolves when the client answers
    async fn ping(&self) -> Result<(), SocketError>;

    /// Close the connection
    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError>;
}

/// [`Downlink`] over axum's WebSocket
pub struct WebSocketDownlink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    pong: Notify,
}

impl WebSocketDownlink {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            pong: Notify::new(),
        }
    }
}

#[async_trait]
impl Downlink for WebSocketDownlink {
    async fn send(&self, frame: String) -> Result<(), SocketError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive(&self) -> Result<String, SocketError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| SocketError::ReceiveFailed(e.to_string()))
                }
                Some(Ok(Message::Pong(_))) => self.pong.notify_waiters(),
                // axum answers pings on its own.
                Some(Ok(Message::Ping(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(SocketError::ConnectionClosed),
                Some(Err(e)) => return Err(SocketError::ReceiveFailed(e.to_string())),
            }
        }
    }

    async fn ping(&self) -> Result<(), SocketError> {
        let pong = self.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        self.sink
            .lock()
            .await
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))?;

        pong.await;
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}
