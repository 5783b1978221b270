// Library crate for the conferencing realtime server
// This file exposes the public API for integration tests

pub mod config;
pub mod event;
pub mod peer;
pub mod routes;
pub mod shared;

// Re-export commonly used types for easier access in tests
pub use config::{Config, ConfigError, LogFormat};
pub use event::{Event, EventEmitter, EventError, SharedCursor, SharedWatcher, Watcher};
pub use peer::{Downlink, PeerConfig, PeerSession, Signal};
pub use routes::router;
pub use shared::{AppError, AppState};
