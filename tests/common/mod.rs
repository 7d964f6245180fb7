#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use deck_director::server::config::{AppState, Settings, StageModels};
use deck_director::server::registry::Registry;
use deck_director::server::services::director::Director;
use deck_director::server::services::llm::{
    CompletionRequest, GatewayMetadata, LlmError, LlmGateway,
};
use deck_director::server::services::retry::RetryPolicy;
use deck_director::server::services::scheduler::{SchedulerConfig, ServiceRouter};
use deck_director::server::services::session_store::{InMemorySessionStore, SessionStore};

/// Gateway that replays queued responses in order. Panics when asked for
/// more than it was scripted with, so tests catch unexpected LLM calls.
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        })
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    fn metadata(&self) -> GatewayMetadata {
        GatewayMetadata {
            name: "scripted".into(),
            default_model: "scripted-model".into(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::ParseError(format!("no scripted response for: {}", request.prompt)))
    }
}

/// Taxonomy document with every service pointed at `base_url` (one wiremock
/// server can stand in for all three).
pub fn registry_json(base_url: &str) -> String {
    include_str!("../../config/taxonomy.json")
        .replace("http://localhost:9101", base_url)
        .replace("http://localhost:9102", base_url)
        .replace("http://localhost:9103", base_url)
}

pub fn test_registry(base_url: &str) -> Arc<Registry> {
    Arc::new(Registry::from_str(&registry_json(base_url)).unwrap())
}

/// Fast retry policy so failure-path tests do not sleep for real.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    }
}

pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 8,
        retry_policy: fast_retry(),
        rate_limit_delay: Duration::ZERO,
        inter_slide_delay: Duration::ZERO,
        disabled_variants: Default::default(),
        fallback_variant: "line_chart".to_string(),
    }
}

pub fn test_settings() -> Settings {
    Settings {
        port: 0,
        taxonomy_path: "config/taxonomy.json".into(),
        database_url: None,
        llm_api_key: String::new(),
        llm_base_url: None,
        models: StageModels {
            greeting: "m".into(),
            clarifying: "m".into(),
            planning: "m".into(),
            strawman: "m".into(),
            refinement: "m".into(),
            intent: "m".into(),
        },
        max_retries: 5,
        retry_base_delay_seconds: 0,
        rate_limit_delay_seconds: 0,
        stage6_concurrency: 8,
        preview_builder_enabled: false,
        streamlined_protocol: false,
        deck_builder_url: "http://localhost:9100".into(),
        presentations_base_url: "http://decks.test/presentations".into(),
        disabled_variants: Default::default(),
        fallback_variant: "line_chart".into(),
        text_service_url: None,
        illustrator_service_url: None,
        analytics_service_url: None,
    }
}

/// Full in-memory application state around a scripted gateway, with all
/// generator traffic aimed at `generator_base_url`.
pub fn test_state(gateway: Arc<ScriptedGateway>, generator_base_url: &str) -> AppState {
    let registry = test_registry(generator_base_url);
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let router = Arc::new(ServiceRouter::new(registry.clone(), fast_scheduler_config()));
    let settings = test_settings();
    let director = Arc::new(Director::new(
        gateway,
        store.clone(),
        registry.clone(),
        router,
        None,
        settings.models.clone(),
        fast_retry(),
        settings.presentations_base_url.clone(),
    ));
    AppState {
        settings: Arc::new(settings),
        registry,
        store,
        director,
    }
}

/// Strawman JSON the scripted gateway returns for a 10-slide executive
/// deck. Slide 2 asks for the executive grid so the audience invariant
/// holds without an inserted slide.
pub fn beekeeping_strawman_json() -> String {
    let slides: Vec<serde_json::Value> = vec![
        slide_json("Beekeeping for the Boardroom", "opening cover", ""),
        slide_json("Executive Summary", "executive snapshot of kpis", ""),
        slide_json("Why Bees, Why Now", "a narrative overview", ""),
        slide_json("Market Timeline", "timeline of adoption phases", ""),
        slide_json("Hive Economics", "bar ranking of cost categories", ""),
        slide_json("Honey Yield Trends", "line trend of yields", ""),
        slide_json("Risk Matrix", "matrix of tradeoffs", ""),
        slide_json("Operating Model", "funnel from swarm to sale", ""),
        slide_json("Team and Roles", "a prose story of the team", ""),
        slide_json("Next Steps", "closing call to action", ""),
    ];
    serde_json::json!({
        "main_title": "Beekeeping for the Boardroom",
        "overall_theme": "pragmatic",
        "design_suggestions": "warm amber palette",
        "target_audience": "executives",
        "duration_minutes": 20,
        "slides": slides
    })
    .to_string()
}

pub fn slide_json(title: &str, preference: &str, narrative: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "narrative": narrative,
        "key_points": ["point one", "point two", "point three"],
        "structure_preference": preference,
        "analytics_needed": null,
        "visuals_needed": null,
        "diagrams_needed": null,
        "tables_needed": null
    })
}

/// Canned generator responses, one shape per family.
pub fn text_response() -> serde_json::Value {
    serde_json::json!({
        "slide_title": "Generated title",
        "element_1": "<p>one</p>",
        "element_2": "<p>two</p>",
        "element_3": "<p>three</p>",
        "rich_content": "<section>body</section>"
    })
}

pub fn illustration_response() -> serde_json::Value {
    serde_json::json!({
        "html": "<svg>diagram</svg>",
        "generated_content": { "elements": 4 },
        "validation": { "ok": true }
    })
}

pub fn analytics_response() -> serde_json::Value {
    serde_json::json!({
        "element_2": "<div style=\"width:540px\">observations</div>",
        "element_3": "<canvas width=\"1260\" height=\"720\"></canvas>"
    })
}
