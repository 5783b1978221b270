use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload type of a peer state change (tracks published by a peer).
pub const PEER_STATE: &str = "peerState";
/// Payload type of a text message sent by a peer.
pub const PEER_MESSAGE: &str = "peerMessage";
/// Payload type of a recording status change.
pub const RECORDING: &str = "recording";
/// Payload type of a reaction.
pub const REACTION: &str = "reaction";

/// An immutable fact appended to a room's stream
///
/// Events are written by an external writer and only ever read by the
/// fan-out engine. The payload body is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub room_id: Uuid,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Typed envelope around an opaque JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates a new event stamped with a fresh id and the current time
    pub fn new(
        room_id: Uuid,
        owner_id: Uuid,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            owner_id,
            created_at: Utc::now(),
            payload: EventPayload {
                kind: kind.into(),
                payload,
            },
        }
    }

    /// Get a human-readable description of the event type
    pub fn event_type(&self) -> &str {
        &self.payload.kind
    }

    /// Whether the payload type is one the peer downlink knows how to render
    pub fn is_known_type(&self) -> bool {
        matches!(
            self.payload.kind.as_str(),
            PEER_STATE | PEER_MESSAGE | RECORDING | REACTION
        )
    }
}
