use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::strawman::PresentationStrawman;

/// Message author. Every outbound frame and every history entry carries one;
/// clients never observe a null role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// The dialog states a session moves through, in rough order. `Terminal`
/// means the final presentation URL has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    ProvideGreeting,
    AskClarifyingQuestions,
    CreateConfirmationPlan,
    GenerateStrawman,
    RefineStrawman,
    ContentGeneration,
    Terminal,
}

/// What a history entry holds. Replay reconstructs the exact outbound
/// messages for an entry from this plus the session's stored strawman, so
/// nothing here ever carries a preview URL of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryContent {
    UserText { text: String },
    AssistantText { text: String },
    PlanPresented { text: String },
    StrawmanPresented,
    GenerationStatus { text: String },
    FinalUrl { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message_id: String,
    pub role: Role,
    pub state: SessionState,
    pub content: HistoryContent,
    pub timestamp: DateTime<Utc>,
    /// Tie-break ordering key for entries sharing a timestamp.
    pub seq: u64,
}

/// One user's presentation-building session. Mutated only by the dialog
/// state machine and persisted after every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub current_state: SessionState,
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub presentation_strawman: Option<PresentationStrawman>,
    #[serde(default)]
    pub final_presentation_url: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            current_state: SessionState::ProvideGreeting,
            conversation_history: Vec::new(),
            presentation_strawman: None,
            final_presentation_url: None,
        }
    }

    /// Append a history entry stamped with the current time and the next
    /// sequence number. Returns the entry for store-side appends.
    pub fn record(&mut self, role: Role, content: HistoryContent) -> HistoryEntry {
        let entry = HistoryEntry {
            message_id: Uuid::new_v4().to_string(),
            role,
            state: self.current_state,
            content,
            timestamp: Utc::now(),
            seq: self.conversation_history.len() as u64,
        };
        self.conversation_history.push(entry.clone());
        entry
    }

    /// History in strict chronological order: timestamp first, stored
    /// sequence index as the tie-break.
    pub fn ordered_history(&self) -> Vec<&HistoryEntry> {
        let mut entries: Vec<&HistoryEntry> = self.conversation_history.iter().collect();
        entries.sort_by_key(|e| (e.timestamp, e.seq));
        entries
    }
}
