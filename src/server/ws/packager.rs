use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::server::models::{HistoryContent, HistoryEntry, Role, Session};

use super::types::{format_timestamp, ActionButton, Envelope, MessageBody, SlideUpdatePayload};

fn envelope(session: &Session, role: Role, ts: DateTime<Utc>, body: MessageBody) -> Envelope {
    Envelope {
        message_id: Uuid::new_v4().to_string(),
        session_id: session.session_id.clone(),
        timestamp: format_timestamp(ts),
        role,
        body,
    }
}

pub fn chat_message(session: &Session, role: Role, ts: DateTime<Utc>, text: &str) -> Envelope {
    envelope(
        session,
        role,
        ts,
        MessageBody::ChatMessage {
            text: text.to_string(),
        },
    )
}

pub fn status_update(session: &Session, ts: DateTime<Utc>, text: &str) -> Envelope {
    envelope(
        session,
        Role::Assistant,
        ts,
        MessageBody::StatusUpdate {
            text: text.to_string(),
        },
    )
}

pub fn presentation_url(session: &Session, ts: DateTime<Utc>, url: &str) -> Envelope {
    envelope(
        session,
        Role::Assistant,
        ts,
        MessageBody::PresentationUrl {
            url: url.to_string(),
        },
    )
}

pub fn sync_response(session: &Session, ts: DateTime<Utc>, action: &str) -> Envelope {
    envelope(
        session,
        Role::Assistant,
        ts,
        MessageBody::SyncResponse {
            action: action.to_string(),
        },
    )
}

pub fn action_request(
    session: &Session,
    ts: DateTime<Utc>,
    prompt: &str,
    actions: Vec<ActionButton>,
) -> Envelope {
    envelope(
        session,
        Role::Assistant,
        ts,
        MessageBody::ActionRequest {
            prompt: prompt.to_string(),
            actions,
        },
    )
}

/// Accept/Reject choices shown with the confirmation plan.
pub fn plan_actions() -> Vec<ActionButton> {
    vec![
        ActionButton::new("Yes, let's build it!", "accept_plan", true),
        ActionButton::new("I'd like to make changes", "reject_plan", false),
    ]
}

/// Accept/Refine choices shown with a strawman.
pub fn strawman_actions() -> Vec<ActionButton> {
    vec![
        ActionButton::new("Looks great, generate the deck!", "accept_strawman", true),
        ActionButton::new("I'd like to refine it", "request_refinement", false),
    ]
}

/// The fixed Stage-4/5 message triplet, in reading order: `slide_update`
/// with the strawman metadata, a preview link when one exists, then the
/// Accept/Refine action request. The preview URL is always read from the
/// session's strawman, never from history content.
pub fn strawman_bundle(session: &Session, ts: DateTime<Utc>) -> Vec<Envelope> {
    let Some(strawman) = &session.presentation_strawman else {
        return Vec::new();
    };

    let mut messages = vec![envelope(
        session,
        Role::Assistant,
        ts,
        MessageBody::SlideUpdate(SlideUpdatePayload {
            main_title: strawman.main_title.clone(),
            overall_theme: strawman.overall_theme.clone(),
            target_audience: strawman.target_audience.clone(),
            duration_minutes: strawman.duration_minutes,
            slide_count: strawman.slides.len(),
            slides: strawman.slides.clone(),
            preview_url: strawman.preview_url.clone(),
            preview_presentation_id: strawman.preview_id.clone(),
        }),
    )];

    if let Some(url) = &strawman.preview_url {
        messages.push(chat_message(
            session,
            Role::Assistant,
            ts,
            &format!("Here's a preview of your deck: {url}"),
        ));
    }

    messages.push(action_request(
        session,
        ts,
        "Would you like to generate the full deck, or refine the outline first?",
        strawman_actions(),
    ));
    messages
}

/// Reconstruct the outbound messages one history entry produced. Replay
/// emits exactly what the live pipeline emitted for that state.
pub fn messages_for_entry(session: &Session, entry: &HistoryEntry) -> Vec<Envelope> {
    match &entry.content {
        HistoryContent::UserText { text } => {
            vec![chat_message(session, Role::User, entry.timestamp, text)]
        }
        HistoryContent::AssistantText { text } => {
            vec![chat_message(session, Role::Assistant, entry.timestamp, text)]
        }
        HistoryContent::PlanPresented { text } => vec![
            chat_message(session, Role::Assistant, entry.timestamp, text),
            action_request(
                session,
                entry.timestamp,
                "Shall we proceed with this plan?",
                plan_actions(),
            ),
        ],
        HistoryContent::StrawmanPresented => strawman_bundle(session, entry.timestamp),
        HistoryContent::GenerationStatus { text } => {
            vec![status_update(session, entry.timestamp, text)]
        }
        HistoryContent::FinalUrl { url } => {
            vec![presentation_url(session, entry.timestamp, url)]
        }
    }
}

/// Rebuild the full message stream for a reconnecting client, in strict
/// chronological order (timestamp, then stored sequence index).
pub fn package_history(session: &Session) -> Vec<Envelope> {
    session
        .ordered_history()
        .into_iter()
        .flat_map(|entry| messages_for_entry(session, entry))
        .collect()
}
