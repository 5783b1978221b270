use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// WebRTC session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalJoin {
    pub user_id: Uuid,
    pub session_id: String,
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalOffer {
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAnswer {
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTrickle {
    pub candidate: IceCandidateInit,
    /// Which peer connection the candidate belongs to (publisher or subscriber)
    pub target: i64,
}

/// Signaling message exchanged with the media routing service
///
/// Serialized externally tagged, e.g. `{"offer": {"description": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalMessage {
    Join(SignalJoin),
    Offer(SignalOffer),
    Answer(SignalAnswer),
    Trickle(SignalTrickle),
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Join(_) => "join",
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Trickle(_) => "trickle",
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal channel closed")]
    Closed,

    /// The media service sent something this peer does not understand
    #[error("unknown signal message: {0}")]
    UnknownMessage(String),

    #[error("signal transport error: {0}")]
    Transport(String),
}

/// Duplex signaling channel to the media routing service
///
/// `receive` is cancelled by dropping its future.
#[async_trait]
pub trait Signal: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalError>;

    async fn receive(&self) -> Result<SignalMessage, SignalError>;

    async fn close(&self) -> Result<(), SignalError>;
}

/// Opens signaling channels for media-enabled peers
#[async_trait]
pub trait SignalConnector: Send + Sync {
    async fn connect(&self, room_id: Uuid, user_id: Uuid) -> Result<Box<dyn Signal>, SignalError>;
}
