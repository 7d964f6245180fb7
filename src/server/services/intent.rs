use std::sync::Arc;

use tracing::{info, warn};

use crate::server::models::SessionState;
use crate::server::services::llm::{CompletionRequest, LlmGateway};

/// Closed intent set across all dialog states. Each state admits a subset;
/// see [`IntentRouter::closed_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Free text that simply advances the dialog (topic, answers).
    Answer,
    AcceptPlan,
    RejectPlan,
    AcceptStrawman,
    RequestRefinement,
    VariantOverride,
    FreeFormEdit,
    Ack,
    Restart,
}

impl Intent {
    /// The machine `value` clients submit via action buttons.
    pub fn value(&self) -> &'static str {
        match self {
            Intent::Answer => "answer",
            Intent::AcceptPlan => "accept_plan",
            Intent::RejectPlan => "reject_plan",
            Intent::AcceptStrawman => "accept_strawman",
            Intent::RequestRefinement => "request_refinement",
            Intent::VariantOverride => "variant_override",
            Intent::FreeFormEdit => "free_form_edit",
            Intent::Ack => "ack",
            Intent::Restart => "restart",
        }
    }

    pub fn from_value(value: &str) -> Option<Intent> {
        let normalized = value.trim().trim_matches(['"', '\'', '.']).to_lowercase();
        let intent = match normalized.as_str() {
            "answer" => Intent::Answer,
            "accept_plan" => Intent::AcceptPlan,
            "reject_plan" => Intent::RejectPlan,
            "accept_strawman" => Intent::AcceptStrawman,
            "request_refinement" => Intent::RequestRefinement,
            "variant_override" => Intent::VariantOverride,
            "free_form_edit" => Intent::FreeFormEdit,
            "ack" => Intent::Ack,
            "restart" => Intent::Restart,
            _ => return None,
        };
        Some(intent)
    }
}

/// Classifies user input into the state's closed intent set. Exact action
/// `value` matches bypass the LLM entirely.
pub struct IntentRouter {
    gateway: Arc<dyn LlmGateway>,
    model: String,
}

impl IntentRouter {
    pub fn new(gateway: Arc<dyn LlmGateway>, model: String) -> Self {
        Self { gateway, model }
    }

    /// The intents admitted after the given state's output.
    pub fn closed_set(state: SessionState) -> &'static [Intent] {
        match state {
            SessionState::ProvideGreeting | SessionState::AskClarifyingQuestions => {
                &[Intent::Answer]
            }
            SessionState::CreateConfirmationPlan => &[Intent::AcceptPlan, Intent::RejectPlan],
            SessionState::GenerateStrawman | SessionState::RefineStrawman => &[
                Intent::AcceptStrawman,
                Intent::RequestRefinement,
                Intent::VariantOverride,
                Intent::FreeFormEdit,
            ],
            SessionState::ContentGeneration | SessionState::Terminal => {
                &[Intent::Ack, Intent::Restart]
            }
        }
    }

    /// The intent a state falls back to when the model's label cannot be
    /// mapped. Strawman states treat unknowns as refinement input.
    fn fallback(state: SessionState) -> Intent {
        match state {
            SessionState::ProvideGreeting | SessionState::AskClarifyingQuestions => Intent::Answer,
            SessionState::CreateConfirmationPlan => Intent::RejectPlan,
            SessionState::GenerateStrawman | SessionState::RefineStrawman => Intent::FreeFormEdit,
            SessionState::ContentGeneration | SessionState::Terminal => Intent::Ack,
        }
    }

    /// Classify `user_text` in the context of `state`.
    pub async fn classify(&self, state: SessionState, user_text: &str) -> Intent {
        let set = Self::closed_set(state);

        // Button submissions arrive as the bare action value.
        if let Some(intent) = Intent::from_value(user_text) {
            if set.contains(&intent) {
                info!(intent = intent.value(), "intent matched action value");
                return intent;
            }
        }
        if set == [Intent::Answer] {
            return Intent::Answer;
        }

        let labels: Vec<&str> = set.iter().map(|i| i.value()).collect();
        let system = format!(
            "You classify a user's reply in a slide-deck building dialog.\n\
             Respond with exactly one of these labels and nothing else:\n{}\n\
             Label meanings:\n\
             - accept_plan / accept_strawman: the user agrees to proceed.\n\
             - reject_plan: the user wants to revisit the plan.\n\
             - request_refinement: the user wants changes to the deck.\n\
             - variant_override: the user names a specific slide and asks for a \
               specific visual form (matrix, funnel, chart, ...).\n\
             - free_form_edit: any other edit instruction.\n\
             - ack: acknowledgement after completion.\n\
             - restart: the user wants to start a new deck.",
            labels.join("\n")
        );

        let response = self
            .gateway
            .complete(CompletionRequest {
                model: self.model.clone(),
                system,
                prompt: user_text.to_string(),
                temperature: 0.0,
            })
            .await;

        match response {
            Ok(label) => {
                let parsed = Intent::from_value(&label).filter(|i| set.contains(i));
                match parsed {
                    Some(intent) => {
                        info!(intent = intent.value(), "intent classified");
                        intent
                    }
                    None => {
                        warn!(label = %label.trim(), "unrecognized intent label");
                        Self::fallback(state)
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "intent classification failed");
                Self::fallback(state)
            }
        }
    }
}
