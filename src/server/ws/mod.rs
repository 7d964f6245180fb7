use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::info;

use crate::server::config::AppState;

pub mod handlers;
pub mod packager;
pub mod transport;
pub mod types;

/// Connection query string: `?session_id=<id>&user_id=<id>`
/// `[&skip_history=true][&last_message_id=<id>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub skip_history: bool,
    /// Accepted for forward compatibility; delta sync is not implemented.
    #[serde(default)]
    pub last_message_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    info!(
        session_id = %params.session_id,
        user_id = %params.user_id,
        skip_history = params.skip_history,
        "WebSocket upgrade request received"
    );
    ws.on_upgrade(move |socket| transport::WebSocketTransport::new(state).handle_socket(socket, params))
}
