mod common;

use common::ScriptedGateway;
use deck_director::server::models::SessionState;
use deck_director::server::services::intent::{Intent, IntentRouter};

fn router(script: Vec<&str>) -> IntentRouter {
    IntentRouter::new(ScriptedGateway::new(script), "intent-model".into())
}

/// Exact action values bypass the LLM entirely. The empty script makes the
/// gateway error on any call, so a wrong intent here would surface as the
/// state's fallback instead of the button's intent.
#[tokio::test]
async fn button_values_bypass_the_model() {
    let router = router(vec![]);
    assert_eq!(
        router
            .classify(SessionState::CreateConfirmationPlan, "accept_plan")
            .await,
        Intent::AcceptPlan
    );
    assert_eq!(
        router
            .classify(SessionState::GenerateStrawman, "accept_strawman")
            .await,
        Intent::AcceptStrawman
    );
    assert_eq!(
        router
            .classify(SessionState::RefineStrawman, "request_refinement")
            .await,
        Intent::RequestRefinement
    );
    assert_eq!(
        router.classify(SessionState::Terminal, "restart").await,
        Intent::Restart
    );
}

/// A value belonging to a different state's set is not accepted verbatim;
/// it goes through classification like any other text.
#[tokio::test]
async fn foreign_values_are_not_matched() {
    let router = router(vec!["reject_plan"]);
    let intent = router
        .classify(SessionState::CreateConfirmationPlan, "accept_strawman")
        .await;
    assert_eq!(intent, Intent::RejectPlan);
}

/// Free text in the greeting and clarifying stages never needs the model.
#[tokio::test]
async fn conversational_states_short_circuit() {
    let router = router(vec![]);
    assert_eq!(
        router
            .classify(SessionState::ProvideGreeting, "a deck about bees")
            .await,
        Intent::Answer
    );
    assert_eq!(
        router
            .classify(SessionState::AskClarifyingQuestions, "executives, 20 minutes")
            .await,
        Intent::Answer
    );
}

/// The model's label is honored when it lands in the state's closed set.
#[tokio::test]
async fn model_labels_are_parsed() {
    let router = router(vec!["variant_override"]);
    let intent = router
        .classify(
            SessionState::RefineStrawman,
            "make slide 4 a matrix comparing pros and cons",
        )
        .await;
    assert_eq!(intent, Intent::VariantOverride);
}

/// Unrecognized labels fall back to free_form_edit in the strawman stages.
#[tokio::test]
async fn unknown_labels_map_to_free_form_edit() {
    let router = router(vec!["something else entirely"]);
    let intent = router
        .classify(SessionState::RefineStrawman, "jazz it up a bit")
        .await;
    assert_eq!(intent, Intent::FreeFormEdit);
}

/// A gateway failure still yields a usable intent.
#[tokio::test]
async fn gateway_failure_falls_back() {
    let router = router(vec![]);
    let intent = router
        .classify(SessionState::RefineStrawman, "tighten the middle section")
        .await;
    assert_eq!(intent, Intent::FreeFormEdit);
}
