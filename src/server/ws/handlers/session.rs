use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::server::config::AppState;
use crate::server::models::{Role, Session, SessionState};
use crate::server::ws::packager;
use crate::server::ws::types::{Envelope, InboundFrame};
use crate::server::ws::ConnectParams;

/// Pause between replayed messages so clients can render incrementally.
const REPLAY_DELAY: Duration = Duration::from_millis(50);

/// Drives one session over one connection. Holds the authoritative
/// in-memory copy of the session; the store is written through on every
/// transition and only read here, at connect.
pub struct SessionHandler {
    state: AppState,
    params: ConnectParams,
    tx: mpsc::Sender<Envelope>,
    cancel: watch::Receiver<bool>,
    session: Session,
}

impl SessionHandler {
    /// Load or create the session. A store failure logs and falls back to a
    /// fresh in-memory session for the life of the connection.
    pub async fn connect(
        state: AppState,
        params: ConnectParams,
        tx: mpsc::Sender<Envelope>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let session_id = params.session_id.clone();
        let user_id = params.user_id.clone();
        let session = match state.store.get_or_create(&session_id, &user_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    session_id = %params.session_id,
                    error = %err,
                    "session store unavailable, continuing in memory"
                );
                Session::new(&params.session_id, &params.user_id)
            }
        };
        info!(
            session_id = %session.session_id,
            state = ?session.current_state,
            "session handler ready"
        );
        Self {
            state,
            params,
            tx,
            cancel,
            session,
        }
    }

    /// Connect-time protocol: greet a fresh session, honor `skip_history`,
    /// or replay the stored conversation in chronological order.
    pub async fn on_connect(&mut self) -> anyhow::Result<()> {
        if let Some(last_message_id) = &self.params.last_message_id {
            // Delta sync is a future extension; only skip_history is honored.
            info!(last_message_id = %last_message_id, "last_message_id ignored");
        }

        if self.session.current_state == SessionState::ProvideGreeting {
            return self
                .state
                .director
                .greet(&mut self.session, self.tx.clone())
                .await;
        }

        if self.params.skip_history {
            let frame = packager::sync_response(&self.session, Utc::now(), "skip_history");
            self.tx.send(frame).await?;
            return Ok(());
        }

        let history = packager::package_history(&self.session);
        info!(
            session_id = %self.session.session_id,
            messages = history.len(),
            "replaying conversation history"
        );
        for message in history {
            self.tx.send(message).await?;
            if !self.state.settings.streamlined_protocol {
                tokio::time::sleep(REPLAY_DELAY).await;
            }
        }
        Ok(())
    }

    /// One inbound frame. Failures surface to the user as a chat message;
    /// the session stays in its current state for recoverable errors.
    pub async fn handle_frame(&mut self, text: String) {
        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "unparseable inbound frame");
                self.send_error("I couldn't read that message; please try again.")
                    .await;
                return;
            }
        };

        match frame {
            InboundFrame::UserMessage { text } => {
                let result = self
                    .state
                    .director
                    .handle_user_message(&mut self.session, text, self.tx.clone(), self.cancel.clone())
                    .await;
                if let Err(err) = result {
                    error!(
                        session_id = %self.session.session_id,
                        error = %err,
                        "dialog step failed"
                    );
                    self.send_error(
                        "Something went wrong on my side. Your session is intact; please try that again.",
                    )
                    .await;
                }
            }
            InboundFrame::SyncRequest { skip_history, .. } => {
                let action = if skip_history { "skip_history" } else { "sync" };
                let frame = packager::sync_response(&self.session, Utc::now(), action);
                if self.tx.send(frame).await.is_err() {
                    warn!("client channel closed during sync");
                }
            }
        }
    }

    async fn send_error(&self, text: &str) {
        let frame = packager::chat_message(&self.session, Role::Assistant, Utc::now(), text);
        let _ = self.tx.send(frame).await;
    }
}
