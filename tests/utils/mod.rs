#![allow(dead_code)]

pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use mocks::{CountingWatcher, FailingEmitter, MockDownlink, MockSignal, PingBehavior};
#[allow(unused_imports)]
pub use setup::{PeerHandle, TestSetup, TestSetupBuilder};
