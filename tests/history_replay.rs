mod common;

use tokio::sync::{mpsc, watch};

use common::{test_state, ScriptedGateway};
use deck_director::server::config::AppState;
use deck_director::server::models::{
    HistoryContent, PresentationStrawman, Role, Session, SessionState,
};
use deck_director::server::ws::handlers::session::SessionHandler;
use deck_director::server::ws::types::{Envelope, MessageBody};
use deck_director::server::ws::ConnectParams;

fn params(session_id: &str, skip_history: bool) -> ConnectParams {
    ConnectParams {
        session_id: session_id.into(),
        user_id: "user-1".into(),
        skip_history,
        last_message_id: None,
    }
}

async fn seeded_session(state: &AppState) -> Session {
    let mut session = state.store.get_or_create("sess-1", "user-1").await.unwrap();
    session.current_state = SessionState::RefineStrawman;
    session.presentation_strawman = Some(PresentationStrawman {
        main_title: "Beekeeping".into(),
        overall_theme: "pragmatic".into(),
        design_suggestions: "warm".into(),
        target_audience: "executives".into(),
        duration_minutes: 20,
        preview_url: Some("https://decks.test/p/current".into()),
        preview_id: Some("prev-current".into()),
        slides: vec![],
    });
    session.record(
        Role::User,
        HistoryContent::UserText {
            text: "a deck about beekeeping".into(),
        },
    );
    session.record(
        Role::Assistant,
        HistoryContent::PlanPresented {
            text: "Plan: 10 slides on beekeeping.".into(),
        },
    );
    session.record(Role::Assistant, HistoryContent::StrawmanPresented);
    state.store.save(&session).await.unwrap();
    session
}

async fn connect_and_drain(
    state: AppState,
    params: ConnectParams,
) -> (Vec<Envelope>, SessionHandler) {
    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel) = watch::channel(false);
    let mut handler = SessionHandler::connect(state, params, tx, cancel).await;
    handler.on_connect().await.unwrap();
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    (messages, handler)
}

/// S5: reconnecting without `skip_history` replays the whole stream in
/// chronological order, and the slide_update reads the preview URL from the
/// stored strawman rather than from history content.
#[tokio::test]
async fn reconnect_replays_history_chronologically() {
    let gateway = ScriptedGateway::new(vec![]);
    let state = test_state(gateway, "http://localhost:1");
    seeded_session(&state).await;

    let (messages, _) = connect_and_drain(state.clone(), params("sess-1", false)).await;

    // user text, plan chat + plan actions, slide_update + preview chat +
    // strawman actions.
    assert_eq!(messages.len(), 6);
    assert!(matches!(messages[0].body, MessageBody::ChatMessage { .. }));
    assert_eq!(messages[0].role, Role::User);
    assert!(matches!(messages[2].body, MessageBody::ActionRequest { .. }));

    let slide_update = match &messages[3].body {
        MessageBody::SlideUpdate(payload) => payload,
        other => panic!("expected slide_update, got {other:?}"),
    };
    assert_eq!(
        slide_update.preview_url.as_deref(),
        Some("https://decks.test/p/current")
    );

    let timestamps: Vec<&String> = messages.iter().map(|m| &m.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted, "replay must be chronological");
}

/// Property: reconstruction is deterministic up to message ids.
#[tokio::test]
async fn replay_is_byte_identical_after_stripping_message_ids() {
    let gateway = ScriptedGateway::new(vec![]);
    let state = test_state(gateway, "http://localhost:1");
    seeded_session(&state).await;

    let strip = |messages: Vec<Envelope>| -> Vec<String> {
        messages
            .into_iter()
            .map(|m| {
                let mut v = serde_json::to_value(m).unwrap();
                v.as_object_mut().unwrap().remove("message_id");
                serde_json::to_string(&v).unwrap()
            })
            .collect()
    };

    let (first, _) = connect_and_drain(state.clone(), params("sess-1", false)).await;
    let (second, _) = connect_and_drain(state.clone(), params("sess-1", false)).await;
    assert_eq!(strip(first), strip(second));
}

/// S6: `skip_history=true` yields exactly one sync_response and nothing
/// else until the next user message.
#[tokio::test]
async fn skip_history_sends_single_sync_response() {
    let gateway = ScriptedGateway::new(vec![]);
    let state = test_state(gateway, "http://localhost:1");
    seeded_session(&state).await;

    let (messages, _) = connect_and_drain(state.clone(), params("sess-1", true)).await;
    assert_eq!(messages.len(), 1);
    match &messages[0].body {
        MessageBody::SyncResponse { action } => assert_eq!(action, "skip_history"),
        other => panic!("expected sync_response, got {other:?}"),
    }
}

/// A brand-new session greets instead of replaying.
#[tokio::test]
async fn fresh_session_runs_greeting_pipeline() {
    let gateway = ScriptedGateway::new(vec!["Welcome! What shall we build?"]);
    let state = test_state(gateway, "http://localhost:1");

    let (messages, _) = connect_and_drain(state, params("fresh-1", false)).await;
    assert_eq!(messages.len(), 1);
    match &messages[0].body {
        MessageBody::ChatMessage { text } => assert!(text.contains("Welcome")),
        other => panic!("expected chat_message, got {other:?}"),
    }
    assert_eq!(messages[0].role, Role::Assistant);
}

/// A mid-session sync_request is answered without disturbing the dialog.
#[tokio::test]
async fn sync_request_frame_gets_sync_response() {
    let gateway = ScriptedGateway::new(vec![]);
    let state = test_state(gateway, "http://localhost:1");
    seeded_session(&state).await;

    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel) = watch::channel(false);
    let mut handler =
        SessionHandler::connect(state, params("sess-1", true), tx, cancel).await;
    handler.on_connect().await.unwrap();
    while rx.try_recv().is_ok() {}

    handler
        .handle_frame(r#"{"type": "sync_request", "data": {"skip_history": true}}"#)
        .await;
    let message = rx.try_recv().unwrap();
    assert!(matches!(message.body, MessageBody::SyncResponse { .. }));
}
