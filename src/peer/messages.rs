use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::event::{Event, EventPayload};

use super::error::PeerError;
use super::signal::SignalMessage;

/// Longest accepted peer message, in characters
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Most tracks a single peer may publish
pub const MAX_TRACKS: usize = 10;

/// Downlink frame exchanged with the client
///
/// Client requests may carry a `requestId`; direct replies echo it back as
/// `responseId`. Exactly one payload field is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default)]
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PeerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_message: Option<PeerMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<RoomEvent>,
}

impl Message {
    pub fn signal(signal: SignalMessage) -> Self {
        Self {
            payload: MessagePayload {
                signal: Some(signal),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn event(event: RoomEvent) -> Self {
        Self {
            payload: MessagePayload {
                event: Some(event),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn state(state: PeerState) -> Self {
        Self {
            payload: MessagePayload {
                state: Some(state),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Marks this message as the reply to `request_id`
    pub fn in_response_to(mut self, request_id: Option<String>) -> Self {
        self.response_id = request_id;
        self
    }
}

/// What kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TrackHint {
    Camera,
    Screen,
    UserAudio,
    DeviceAudio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub hint: TrackHint,
}

/// Tracks currently published by a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerState {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl PeerState {
    pub fn validate(&self) -> Result<(), PeerError> {
        if self.tracks.len() > MAX_TRACKS {
            return Err(PeerError::validation(format!(
                "too many tracks: {} (max {})",
                self.tracks.len(),
                MAX_TRACKS
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for track in &self.tracks {
            if track.id.is_empty() {
                return Err(PeerError::validation("track id is empty"));
            }
            if !seen.insert(track.id.as_str()) {
                return Err(PeerError::validation(format!(
                    "duplicate track id: {}",
                    track.id
                )));
            }
        }
        Ok(())
    }
}

/// Free-text message broadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub text: String,
}

impl PeerMessage {
    pub fn validate(&self) -> Result<(), PeerError> {
        let len = self.text.chars().count();
        if len == 0 {
            return Err(PeerError::validation("message text is empty"));
        }
        if len > MAX_MESSAGE_LEN {
            return Err(PeerError::validation(format!(
                "message text too long: {} (max {})",
                len, MAX_MESSAGE_LEN
            )));
        }
        Ok(())
    }
}

/// Room event as rendered on the downlink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub room_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl TryFrom<Event> for RoomEvent {
    type Error = PeerError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        if !event.is_known_type() {
            return Err(PeerError::UnknownMessage(event.payload.kind));
        }
        Ok(Self {
            id: event.id,
            owner_id: event.owner_id,
            room_id: event.room_id,
            created_at: event.created_at,
            payload: event.payload,
        })
    }
}
