use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::server::models::{Role, Slide};

/// Frames a client may send. `data` carries the type-specific fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundFrame {
    UserMessage {
        text: String,
    },
    SyncRequest {
        #[serde(default)]
        skip_history: bool,
        #[serde(default)]
        last_message_id: Option<String>,
    },
}

/// One action choice offered to the client. Clients render `label` and
/// submit `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub label: String,
    pub value: String,
    pub primary: bool,
    pub requires_input: bool,
}

impl ActionButton {
    pub fn new(label: &str, value: &str, primary: bool) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
            primary,
            requires_input: false,
        }
    }
}

/// Strawman metadata pushed on Stage 4/5. `preview_url` always reflects the
/// session's current strawman, never a historical copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideUpdatePayload {
    pub main_title: String,
    pub overall_theme: String,
    pub target_audience: String,
    pub duration_minutes: u32,
    pub slide_count: usize,
    pub slides: Vec<Slide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_presentation_id: Option<String>,
}

/// Type-specific payloads, adjacently tagged so the wire carries
/// `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    ChatMessage {
        text: String,
    },
    ActionRequest {
        prompt: String,
        actions: Vec<ActionButton>,
    },
    SlideUpdate(SlideUpdatePayload),
    StatusUpdate {
        text: String,
    },
    PresentationUrl {
        url: String,
    },
    SyncResponse {
        action: String,
    },
}

/// Every outbound frame. `role` is always set; timestamps are RFC 3339
/// UTC with a trailing `Z`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub session_id: String,
    pub timestamp: String,
    pub role: Role,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// The one timestamp format the protocol speaks.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
