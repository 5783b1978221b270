use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::SharedCursor;
use crate::shared::{AppError, AppState};

use super::session::PeerSession;
use super::signal::{Signal, SignalError};
use super::socket::{Downlink, WebSocketDownlink, CLOSE_NORMAL};

/// Query parameters of the peer websocket endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerParams {
    pub user_id: Uuid,
    /// Whether to open a signaling channel to the media service
    #[serde(default)]
    pub media: bool,
}

/// WebSocket endpoint joining a room's event stream
/// GET /ws/{room_id}?userId={uuid}&media={bool}
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<Uuid>,
    Query(params): Query<PeerParams>,
    State(app_state): State<AppState>,
) -> Result<Response, AppError> {
    info!(
        room_id = %room_id,
        user_id = %params.user_id,
        media = params.media,
        "WebSocket connection requested"
    );

    if params.media && app_state.signal_connector.is_none() {
        warn!(room_id = %room_id, "Media requested but no media service is configured");
        return Err(AppError::BadRequest("Media is not available".to_string()));
    }

    // Subscribe before upgrading so the peer sees every event from here on.
    let cursor = app_state.watcher.subscribe(room_id).await?;

    Ok(ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, room_id, params, cursor, app_state)
    }))
}

/// Handle the upgraded WebSocket connection
async fn handle_websocket_connection(
    socket: WebSocket,
    room_id: Uuid,
    params: PeerParams,
    cursor: SharedCursor,
    app_state: AppState,
) {
    info!(
        room_id = %room_id,
        user_id = %params.user_id,
        "WebSocket connection established"
    );

    let downlink: Arc<dyn Downlink> = Arc::new(WebSocketDownlink::new(socket));

    let signal = match connect_signal(&app_state, room_id, &params, downlink.as_ref()).await {
        Ok(signal) => signal,
        Err(_) => return,
    };

    let session = PeerSession::new(
        params.user_id,
        room_id,
        downlink,
        cursor,
        Arc::clone(&app_state.emitter),
        app_state.peer_config.clone(),
    );
    session.serve(signal, &app_state.shutdown).await;

    info!(
        room_id = %room_id,
        user_id = %params.user_id,
        "WebSocket connection closed"
    );
}

/// Opens the media signaling channel for media-enabled peers
///
/// When the media service cannot be reached the downlink is closed and the
/// connection error returned.
async fn connect_signal(
    app_state: &AppState,
    room_id: Uuid,
    params: &PeerParams,
    downlink: &dyn Downlink,
) -> Result<Option<Box<dyn Signal>>, SignalError> {
    let connector = match (&app_state.signal_connector, params.media) {
        (Some(connector), true) => connector,
        _ => return Ok(None),
    };

    match connector.connect(room_id, params.user_id).await {
        Ok(signal) => Ok(Some(signal)),
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Failed to connect to signal");
            if let Err(close_error) = downlink
                .close(CLOSE_NORMAL, "Media service unavailable.")
                .await
            {
                debug!(room_id = %room_id, error = %close_error, "Downlink already closed");
            }
            Err(e)
        }
    }
}
