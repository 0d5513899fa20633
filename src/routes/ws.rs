use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::hub::serve_socket;
use crate::AppState;

/// Upgrade to a WebSocket; authentication happens on the socket itself
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    let auth_timeout = state.config.auth_timeout();
    ws.on_upgrade(move |socket| serve_socket(hub, socket, auth_timeout))
}
