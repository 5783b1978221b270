use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event::{EventEmitter, EventError, SharedWatcher};
use crate::peer::{PeerConfig, SignalConnector};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub watcher: Arc<SharedWatcher>,
    pub emitter: Arc<dyn EventEmitter>,
    /// Present when a media routing service is configured
    pub signal_connector: Option<Arc<dyn SignalConnector>>,
    pub peer_config: PeerConfig,
    /// Cancelled on process shutdown; every peer session runs under a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(watcher: Arc<SharedWatcher>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            watcher,
            emitter,
            signal_connector: None,
            peer_config: PeerConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_signal_connector(mut self, connector: Arc<dyn SignalConnector>) -> Self {
        self.signal_connector = Some(connector);
        self
    }

    pub fn with_peer_config(mut self, peer_config: PeerConfig) -> Self {
        self.peer_config = peer_config;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal,
}

impl From<EventError> for AppError {
    fn from(error: EventError) -> Self {
        match error {
            EventError::ShuttingDown => AppError::ShuttingDown,
            _ => AppError::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is shutting down".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
