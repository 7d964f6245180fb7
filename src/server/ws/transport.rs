use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::server::config::AppState;

use super::handlers::session::SessionHandler;
use super::types::Envelope;
use super::ConnectParams;

/// Owns one WebSocket connection: splits the socket, pumps outbound
/// envelopes, feeds inbound text frames to the session driver in arrival
/// order, and flips the cancel flag when the client goes away.
pub struct WebSocketTransport {
    state: AppState,
}

impl WebSocketTransport {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn handle_socket(self, socket: WebSocket, params: ConnectParams) {
        let session_id = params.session_id.clone();
        let (mut sender, mut receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(32);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Outbound pump: envelopes to JSON text frames.
        let send_handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(err) => {
                        error!(error = %err, "failed to serialize outbound envelope");
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        // Inbound pump: raises the cancel flag when the client disconnects
        // so in-flight generator calls can stop cooperatively.
        let receive_handle = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("client closed connection");
                        break;
                    }
                    _ => {}
                }
            }
            let _ = cancel_tx.send(true);
        });

        // Session driver: strictly one inbound message at a time.
        let driver_state = self.state.clone();
        let driver_handle = tokio::spawn(async move {
            let mut handler = Box::pin(SessionHandler::connect(
                driver_state,
                params,
                tx,
                cancel_rx,
            ))
            .await;
            if let Err(err) = Box::pin(handler.on_connect()).await {
                error!(error = %err, "connection setup failed");
                return;
            }
            while let Some(text) = inbound_rx.recv().await {
                Box::pin(handler.handle_frame(text)).await;
            }
        });

        tokio::select! {
            _ = send_handle => info!(session_id = %session_id, "send task completed"),
            _ = receive_handle => info!(session_id = %session_id, "receive task completed"),
            _ = driver_handle => info!(session_id = %session_id, "driver task completed"),
        }
    }
}
