pub mod summary;

pub use summary::{CriticalIssue, ErrorSummary, Severity, SlideFailure, SummaryBuilder};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::server::models::PresentationStrawman;
use crate::server::registry::{Registry, ServiceName};
use crate::server::services::generators::{
    FailureCategory, GeneratedSlideContent, GeneratorClient, GeneratorError, GenerationRequest,
};
use crate::server::services::retry::{call_with_retry, RateLimiter, RetryPolicy};

/// Per-slide outcome, parallel to the input slide order. Failed slides keep
/// their position here and additionally appear in `failed_slides`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSlide {
    pub slide_id: String,
    pub slide_number: u32,
    pub variant_id: String,
    pub service: String,
    pub status: SlideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<GeneratedSlideContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideStatus {
    Succeeded,
    Failed,
}

/// Advisory progress events emitted while Stage-6 runs. Ordering between
/// slides is not guaranteed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    SlideStarted { slide_number: u32 },
    SlideFinished { slide_number: u32, ok: bool },
}

/// What one Stage-6 run produced.
#[derive(Debug)]
pub struct GenerationReport {
    pub generated_slides: Vec<GeneratedSlide>,
    pub failed_slides: Vec<SlideFailure>,
    pub error_summary: ErrorSummary,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on in-flight generator calls; the effective bound is
    /// `min(max_concurrency, slide count)`.
    pub max_concurrency: usize,
    pub retry_policy: RetryPolicy,
    /// Minimum spacing between calls on the same service queue.
    pub rate_limit_delay: Duration,
    /// Minimum spacing between slide dispatches within one session.
    pub inter_slide_delay: Duration,
    /// Variants turned off in configuration; silently remapped.
    pub disabled_variants: HashSet<String>,
    /// Where disabled variants are remapped to.
    pub fallback_variant: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            retry_policy: RetryPolicy::default(),
            rate_limit_delay: Duration::from_secs(2),
            inter_slide_delay: Duration::from_secs(2),
            disabled_variants: HashSet::new(),
            fallback_variant: "line_chart".to_string(),
        }
    }
}

/// The Stage-6 service router: routes each classified slide to its
/// generator, fans calls out in parallel, retries, and aggregates failures.
/// A single slide failing never aborts the run.
pub struct ServiceRouter {
    registry: Arc<Registry>,
    clients: HashMap<ServiceName, GeneratorClient>,
    limiters: HashMap<ServiceName, RateLimiter>,
    session_limiter: RateLimiter,
    config: SchedulerConfig,
}

enum SlideOutcome {
    Success {
        variant_id: String,
        service: ServiceName,
        content: GeneratedSlideContent,
        absorbed: Vec<FailureCategory>,
    },
    Failure(Box<SlideFailure>),
}

/// Resolves when the watch flag flips to `true`. Never resolves if the
/// sender goes away, so a dropped driver does not read as a cancel.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl ServiceRouter {
    pub fn new(registry: Arc<Registry>, config: SchedulerConfig) -> Self {
        let clients: HashMap<ServiceName, GeneratorClient> = registry
            .services
            .iter()
            .map(|(name, service_config)| {
                (*name, GeneratorClient::new(*name, service_config.clone()))
            })
            .collect();
        let limiters = clients
            .keys()
            .map(|name| (*name, RateLimiter::new(config.rate_limit_delay)))
            .collect();
        Self {
            registry,
            clients,
            limiters,
            session_limiter: RateLimiter::new(config.inter_slide_delay),
            config,
        }
    }

    /// Generate content for every slide. The returned `generated_slides`
    /// array is parallel to the input order regardless of completion order.
    /// Cancellation (via `cancel`) marks unfinished slides failed so a
    /// partial run still produces a coherent report.
    pub async fn generate_all(
        &self,
        strawman: &PresentationStrawman,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        cancel: watch::Receiver<bool>,
    ) -> GenerationReport {
        let slide_count = strawman.slides.len();
        let bound = self.config.max_concurrency.min(slide_count).max(1);
        info!(slides = slide_count, bound, "stage-6 generation starting");

        let builder = Mutex::new(SummaryBuilder::new());
        let presentation_id = strawman
            .preview_id
            .clone()
            .unwrap_or_else(|| strawman.main_title.clone());

        let mut outcomes: Vec<(usize, SlideOutcome)> = stream::iter(
            strawman
                .slides
                .iter()
                .enumerate()
                .map(|(index, slide)| {
                    let progress = progress.clone();
                    let cancel = cancel.clone();
                    let builder = &builder;
                    let presentation_id = presentation_id.clone();
                    let strawman = strawman;
                    async move {
                        if let Some(tx) = &progress {
                            let _ = tx
                                .send(ProgressEvent::SlideStarted {
                                    slide_number: slide.slide_number,
                                })
                                .await;
                        }
                        let outcome = tokio::select! {
                            outcome = self.generate_slide(&presentation_id, strawman, index) => outcome,
                            _ = cancelled(cancel) => SlideOutcome::Failure(Box::new(SlideFailure {
                                slide_id: slide.slide_id.clone(),
                                slide_number: slide.slide_number,
                                slide_type: slide
                                    .slide_type_classification
                                    .clone()
                                    .unwrap_or_default(),
                                service: String::new(),
                                endpoint: String::new(),
                                error: "generation cancelled before completion".to_string(),
                                category: FailureCategory::Unknown,
                                suggested_action: FailureCategory::Unknown
                                    .suggested_action()
                                    .to_string(),
                                http_status: None,
                            })),
                        };
                        match &outcome {
                            SlideOutcome::Success {
                                service, absorbed, ..
                            } => {
                                if !absorbed.is_empty() {
                                    let mut builder = builder.lock().await;
                                    for category in absorbed {
                                        builder.record_absorbed_retries(
                                            service.as_str(),
                                            *category,
                                            1,
                                        );
                                    }
                                }
                            }
                            SlideOutcome::Failure(failure) => {
                                builder.lock().await.record_failure(*failure.clone());
                            }
                        }
                        if let Some(tx) = &progress {
                            let _ = tx
                                .send(ProgressEvent::SlideFinished {
                                    slide_number: slide.slide_number,
                                    ok: matches!(outcome, SlideOutcome::Success { .. }),
                                })
                                .await;
                        }
                        (index, outcome)
                    }
                }),
        )
        .buffer_unordered(bound)
        .collect()
        .await;

        // Collate back into input order before anything downstream sees it.
        outcomes.sort_by_key(|(index, _)| *index);

        let generated_slides = outcomes
            .into_iter()
            .map(|(index, outcome)| {
                let slide = &strawman.slides[index];
                match outcome {
                    SlideOutcome::Success {
                        variant_id,
                        service,
                        content,
                        ..
                    } => GeneratedSlide {
                        slide_id: slide.slide_id.clone(),
                        slide_number: slide.slide_number,
                        variant_id,
                        service: service.as_str().to_string(),
                        status: SlideStatus::Succeeded,
                        content: Some(content),
                    },
                    SlideOutcome::Failure(failure) => GeneratedSlide {
                        slide_id: slide.slide_id.clone(),
                        slide_number: slide.slide_number,
                        variant_id: slide.variant_id.clone().unwrap_or_default(),
                        service: failure.service.clone(),
                        status: SlideStatus::Failed,
                        content: None,
                    },
                }
            })
            .collect();

        let (failed_slides, error_summary) = builder.into_inner().finish();
        info!(
            failures = failed_slides.len(),
            digest = %error_summary.digest(),
            "stage-6 generation finished"
        );
        GenerationReport {
            generated_slides,
            failed_slides,
            error_summary,
        }
    }

    /// Route and run one slide's generation, retries included.
    async fn generate_slide(
        &self,
        presentation_id: &str,
        strawman: &PresentationStrawman,
        index: usize,
    ) -> SlideOutcome {
        let slide = &strawman.slides[index];
        let failure = |service: &str, endpoint: &str, error: &GeneratorError| {
            Box::new(SlideFailure {
                slide_id: slide.slide_id.clone(),
                slide_number: slide.slide_number,
                slide_type: slide.slide_type_classification.clone().unwrap_or_default(),
                service: service.to_string(),
                endpoint: endpoint.to_string(),
                error: error.to_string(),
                category: error.category(),
                suggested_action: error.category().suggested_action().to_string(),
                http_status: error.http_status(),
            })
        };

        let Some(requested) = slide.variant_id.clone() else {
            let err = GeneratorError::Validation(format!(
                "slide {} reached generation unclassified",
                slide.slide_number
            ));
            return SlideOutcome::Failure(failure("", "", &err));
        };

        // Disabled variants are silently remapped to the configured
        // fallback; the swap is logged but never surfaced as a failure.
        let effective = if self.config.disabled_variants.contains(&requested) {
            warn!(
                slide = slide.slide_number,
                from = %requested,
                to = %self.config.fallback_variant,
                "variant disabled, remapping to fallback"
            );
            self.config.fallback_variant.clone()
        } else {
            requested
        };

        let Some((service_name, _, variant)) = self.registry.variant(&effective) else {
            let err =
                GeneratorError::Validation(format!("unknown variant '{effective}' requested"));
            return SlideOutcome::Failure(failure("", "", &err));
        };
        let variant = variant.clone();

        // Hard layout constraint: hero variants on L29 only, content on L25.
        if slide.layout_id != Some(variant.classification.layout_id) {
            let err = GeneratorError::Validation(format!(
                "variant '{}' requires layout {}, slide {} carries {:?}",
                variant.variant_id,
                variant.classification.layout_id,
                slide.slide_number,
                slide.layout_id
            ));
            return SlideOutcome::Failure(failure(service_name.as_str(), "", &err));
        }

        let Some(client) = self.clients.get(&service_name) else {
            let err = GeneratorError::MissingClient(service_name.as_str().to_string());
            return SlideOutcome::Failure(failure(service_name.as_str(), "", &err));
        };
        let endpoint = match client.endpoint_for(&variant) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                return SlideOutcome::Failure(failure(service_name.as_str(), "", &err));
            }
        };

        let mut request = GenerationRequest::for_slide(
            presentation_id,
            &strawman.main_title,
            &strawman.overall_theme,
            &strawman.target_audience,
            slide,
            &variant.variant_id,
        );
        if let Some(illustration) = &variant.illustration {
            let count = if slide.key_points.is_empty() {
                illustration.optimal_elements
            } else {
                (slide.key_points.len() as u32)
                    .clamp(illustration.min_elements, illustration.max_elements)
            };
            request.element_count = Some(count);
        }

        // Session-wide pacing first, then the service queue's own spacing.
        self.session_limiter.acquire().await;
        if let Some(limiter) = self.limiters.get(&service_name) {
            limiter.acquire().await;
        }

        // Categories of retryable failures absorbed along the way; reported
        // in the summary even when the call ultimately succeeds.
        let absorbed: std::sync::Mutex<Vec<FailureCategory>> = std::sync::Mutex::new(Vec::new());
        let call_name = format!("{}:{}", service_name.as_str(), slide.slide_id);
        let result = call_with_retry(
            || {
                let fut = client.generate(&variant, &request);
                let absorbed = &absorbed;
                async move {
                    match fut.await {
                        Ok(content) => Ok(content),
                        Err(err) => {
                            if let Ok(mut categories) = absorbed.lock() {
                                categories.push(err.category());
                            }
                            Err(err)
                        }
                    }
                }
            },
            &self.config.retry_policy,
            &call_name,
        )
        .await;

        match result {
            Ok(outcome) => {
                let mut categories = absorbed.into_inner().unwrap_or_default();
                categories.truncate(outcome.retries_absorbed as usize);
                SlideOutcome::Success {
                    variant_id: variant.variant_id.clone(),
                    service: service_name,
                    content: outcome.value,
                    absorbed: categories,
                }
            }
            Err(err) => SlideOutcome::Failure(failure(service_name.as_str(), &endpoint, &err.error)),
        }
    }
}
