// Per-connection peer sessions
//
// A peer consumes one room's shared event stream over a websocket downlink
// and relays WebRTC signaling to the media service.

// Public API - what other modules can use
pub use error::{PeerError, SocketError};
pub use handler::{websocket_handler, PeerParams};
pub use messages::{
    Message, MessagePayload, PeerMessage, PeerState, RoomEvent, Track, TrackHint,
    MAX_MESSAGE_LEN, MAX_TRACKS,
};
pub use session::{PeerConfig, PeerSession};
pub use signal::{
    IceCandidateInit, SdpType, SessionDescription, Signal, SignalAnswer, SignalConnector,
    SignalError, SignalJoin, SignalMessage, SignalOffer, SignalTrickle,
};
pub use socket::{Downlink, WebSocketDownlink, CLOSE_NORMAL};

// Internal modules
mod error;
mod handler;
mod messages;
mod session;
mod signal;
mod socket;
