// Shared room event streams
//
// One upstream change feed per room is pulled into a bounded linked log and
// fanned out to any number of cursors.

// Public API - what other modules can use
pub use cursor::SharedCursor;
pub use error::EventError;
pub use events::{Event, EventPayload, PEER_MESSAGE, PEER_STATE, REACTION, RECORDING};
pub use feed::{EventEmitter, FeedCursor, Watcher};
pub use memory::{MemoryEventStore, MemoryFeedCursor};
pub use room::RoomBuffer;
pub use shared::SharedWatcher;

// Internal modules
mod cursor;
mod error;
mod events;
mod feed;
mod memory;
mod node;
mod room;
mod shared;
