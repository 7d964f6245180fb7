use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes::health_check;
use crate::server::registry::{Registry, ServiceName};
use crate::server::services::deck_builder::DeckBuilderClient;
use crate::server::services::director::Director;
use crate::server::services::llm::{LlmConfig, VertexService};
use crate::server::services::retry::RetryPolicy;
use crate::server::services::scheduler::{SchedulerConfig, ServiceRouter};
use crate::server::services::session_store::{build_store, SessionStore};
use crate::server::ws;

/// Model identifier per dialog stage, each overridable via environment.
#[derive(Debug, Clone)]
pub struct StageModels {
    pub greeting: String,
    pub clarifying: String,
    pub planning: String,
    pub strawman: String,
    pub refinement: String,
    pub intent: String,
}

fn stage_model(var: &str, default_model: &str) -> String {
    env::var(var).unwrap_or_else(|_| default_model.to_string())
}

impl Default for StageModels {
    fn default() -> Self {
        let default_model =
            env::var("DIRECTOR_DEFAULT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        Self {
            greeting: stage_model("GREETING_MODEL", &default_model),
            clarifying: stage_model("CLARIFYING_MODEL", &default_model),
            planning: stage_model("PLANNING_MODEL", &default_model),
            strawman: stage_model("STRAWMAN_MODEL", &default_model),
            refinement: stage_model("REFINEMENT_MODEL", &default_model),
            intent: stage_model("INTENT_MODEL", &default_model),
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub taxonomy_path: String,
    pub database_url: Option<String>,
    pub llm_api_key: String,
    pub llm_base_url: Option<String>,
    pub models: StageModels,
    pub max_retries: u32,
    pub retry_base_delay_seconds: u64,
    pub rate_limit_delay_seconds: u64,
    pub stage6_concurrency: usize,
    pub preview_builder_enabled: bool,
    pub streamlined_protocol: bool,
    pub deck_builder_url: String,
    pub presentations_base_url: String,
    pub disabled_variants: HashSet<String>,
    pub fallback_variant: String,
    pub text_service_url: Option<String>,
    pub illustrator_service_url: Option<String>,
    pub analytics_service_url: Option<String>,
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(var: &str) -> bool {
    env::var(var)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            port: env_u64("PORT", 8000) as u16,
            taxonomy_path: env::var("TAXONOMY_PATH")
                .unwrap_or_else(|_| "config/taxonomy.json".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            llm_api_key: env::var("VERTEX_API_KEY").unwrap_or_default(),
            llm_base_url: env::var("VERTEX_API_URL").ok(),
            models: StageModels::default(),
            max_retries: env_u64("MAX_VERTEX_RETRIES", 5) as u32,
            retry_base_delay_seconds: env_u64("VERTEX_RETRY_BASE_DELAY_SECONDS", 2),
            rate_limit_delay_seconds: env_u64("RATE_LIMIT_DELAY_SECONDS", 2),
            stage6_concurrency: env_u64("STAGE6_MAX_CONCURRENCY", 8) as usize,
            preview_builder_enabled: env_flag("PREVIEW_BUILDER_ENABLED"),
            streamlined_protocol: env_flag("STREAMLINED_PROTOCOL"),
            deck_builder_url: env::var("DECK_BUILDER_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            presentations_base_url: env::var("PRESENTATIONS_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9100/presentations".to_string()),
            disabled_variants: env::var("DISABLED_VARIANTS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            fallback_variant: env::var("FALLBACK_VARIANT")
                .unwrap_or_else(|_| "line_chart".to_string()),
            text_service_url: env::var("TEXT_SERVICE_URL").ok(),
            illustrator_service_url: env::var("ILLUSTRATOR_SERVICE_URL").ok(),
            analytics_service_url: env::var("ANALYTICS_SERVICE_URL").ok(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.retry_base_delay_seconds),
            ..RetryPolicy::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency: self.stage6_concurrency,
            retry_policy: self.retry_policy(),
            rate_limit_delay: Duration::from_secs(self.rate_limit_delay_seconds),
            inter_slide_delay: Duration::from_secs(self.rate_limit_delay_seconds),
            disabled_variants: self.disabled_variants.clone(),
            fallback_variant: self.fallback_variant.clone(),
        }
    }

    /// Environment base URLs take precedence over the taxonomy document.
    pub fn apply_service_overrides(&self, registry: &mut Registry) {
        let overrides = [
            (ServiceName::Text, &self.text_service_url),
            (ServiceName::Illustrator, &self.illustrator_service_url),
            (ServiceName::Analytics, &self.analytics_service_url),
        ];
        for (name, url) in overrides {
            if let (Some(url), Some(service)) = (url, registry.services.get_mut(&name)) {
                service.base_url = url.clone();
            }
        }
    }
}

/// Shared application state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
    pub store: Arc<dyn SessionStore>,
    pub director: Arc<Director>,
}

impl AppState {
    pub async fn build(settings: Settings) -> Result<Self> {
        let mut registry = Registry::load(&settings.taxonomy_path)
            .context("taxonomy registry failed validation")?;
        settings.apply_service_overrides(&mut registry);
        let registry = Arc::new(registry);

        let store = build_store(settings.database_url.as_deref()).await?;

        let gateway = Arc::new(VertexService::with_config(LlmConfig {
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_base_url.clone(),
            default_model: Some(settings.models.strawman.clone()),
            timeout_secs: Some(120),
        }));

        let router = Arc::new(ServiceRouter::new(
            registry.clone(),
            settings.scheduler_config(),
        ));
        let deck_builder = settings
            .preview_builder_enabled
            .then(|| DeckBuilderClient::new(settings.deck_builder_url.clone()));

        let director = Arc::new(Director::new(
            gateway,
            store.clone(),
            registry.clone(),
            router,
            deck_builder,
            settings.models.clone(),
            settings.retry_policy(),
            settings.presentations_base_url.clone(),
        ));

        info!(variants = registry.variant_count(), "application state ready");
        Ok(Self {
            settings: Arc::new(settings),
            registry,
            store,
            director,
        })
    }
}

pub fn configure_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
