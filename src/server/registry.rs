use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::server::models::LayoutId;

/// The three downstream generator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Text,
    Illustrator,
    Analytics,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Text => "text",
            ServiceName::Illustrator => "illustrator",
            ServiceName::Analytics => "analytics",
        }
    }
}

/// How a service exposes its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointPattern {
    /// One endpoint for the whole service; the variant travels in the body.
    Single,
    /// One endpoint per variant, e.g. `/pyramid/generate`.
    PerVariant,
    /// A templated path keyed by type, e.g. `/analytics/{layout}/{analytics_type}`.
    Typed,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read taxonomy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse taxonomy document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate variant_id '{0}'")]
    DuplicateVariant(String),

    #[error("keyword '{keyword}' appears in both '{first}' and '{second}'")]
    DuplicateKeyword {
        keyword: String,
        first: String,
        second: String,
    },

    #[error("variant '{variant}' has priority {priority}, expected 1..=100")]
    PriorityOutOfRange { variant: String, priority: u32 },

    #[error("variant '{variant}' has {count} keywords, at least 5 required")]
    TooFewKeywords { variant: String, count: usize },

    #[error("variant id '{0}' does not match ^[a-z][a-z0-9_]*$")]
    InvalidVariantId(String),

    #[error("service '{service}' endpoint pattern mismatch: {detail}")]
    EndpointPatternMismatch { service: String, detail: String },
}

/// Classification metadata used by the slide-type classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// The slide-type family the variant belongs to ("comparison",
    /// "sequence", "hero", ...). Diversity is tracked at this level.
    pub slide_type: String,
    /// Lower values are matched earlier. Must lie in 1..=100.
    pub priority: u32,
    /// Whole-word, case-insensitive match terms. Globally unique.
    pub keywords: Vec<String>,
    pub layout_id: LayoutId,
}

/// Element-count envelope for illustration variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IllustrationParams {
    pub min_elements: u32,
    pub optimal_elements: u32,
    pub max_elements: u32,
}

/// Data-shape constraints for analytics variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsParams {
    /// The `{analytics_type}` path segment for typed endpoints.
    pub analytics_type: String,
    #[serde(default)]
    pub min_series: Option<u32>,
    #[serde(default)]
    pub max_series: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    /// Per-variant endpoint path; required for `per_variant` services,
    /// forbidden otherwise.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub classification: Classification,
    /// Free-text guidance passed to the LLM when drafting slides of this
    /// variant.
    #[serde(default)]
    pub llm_guidance: Option<String>,
    #[serde(default)]
    pub illustration: Option<IllustrationParams>,
    #[serde(default)]
    pub analytics: Option<AnalyticsParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub endpoint_pattern: EndpointPattern,
    /// Service-level endpoint; required for `single` (the one endpoint) and
    /// `typed` (the path template) patterns.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub variants: Vec<Variant>,
}

/// The process-wide variant/keyword registry. Loaded once at startup,
/// validated, and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub services: BTreeMap<ServiceName, ServiceConfig>,
}

fn variant_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("variant id regex is valid"))
}

impl Registry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            variants = registry.variant_count(),
            "loaded taxonomy registry"
        );
        Ok(registry)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self, RegistryError> {
        let registry: Registry = serde_json::from_str(raw)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn variant_count(&self) -> usize {
        self.services.values().map(|s| s.variants.len()).sum()
    }

    /// Startup validation. Rejects duplicate variant ids, duplicate keywords
    /// across variants, priorities outside 1..=100, classifications with
    /// fewer than five keywords, malformed variant ids, and endpoint shapes
    /// inconsistent with the service's declared pattern.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut seen_variants: HashSet<&str> = HashSet::new();
        let mut keyword_owner: HashMap<String, &str> = HashMap::new();

        for (name, service) in &self.services {
            match service.endpoint_pattern {
                EndpointPattern::Single => {
                    if service.endpoint.is_none() {
                        return Err(RegistryError::EndpointPatternMismatch {
                            service: name.as_str().to_string(),
                            detail: "single pattern requires a service-level endpoint".into(),
                        });
                    }
                }
                EndpointPattern::Typed => {
                    let endpoint = service.endpoint.as_deref().unwrap_or_default();
                    if !endpoint.contains('{') {
                        return Err(RegistryError::EndpointPatternMismatch {
                            service: name.as_str().to_string(),
                            detail: "typed pattern requires a templated service endpoint".into(),
                        });
                    }
                }
                EndpointPattern::PerVariant => {}
            }

            for variant in &service.variants {
                if !variant_id_regex().is_match(&variant.variant_id) {
                    return Err(RegistryError::InvalidVariantId(variant.variant_id.clone()));
                }
                if !seen_variants.insert(&variant.variant_id) {
                    return Err(RegistryError::DuplicateVariant(variant.variant_id.clone()));
                }

                let classification = &variant.classification;
                if classification.priority < 1 || classification.priority > 100 {
                    return Err(RegistryError::PriorityOutOfRange {
                        variant: variant.variant_id.clone(),
                        priority: classification.priority,
                    });
                }
                if classification.keywords.len() < 5 {
                    return Err(RegistryError::TooFewKeywords {
                        variant: variant.variant_id.clone(),
                        count: classification.keywords.len(),
                    });
                }
                for keyword in &classification.keywords {
                    let normalized = keyword.to_lowercase();
                    if let Some(first) = keyword_owner.get(&normalized) {
                        return Err(RegistryError::DuplicateKeyword {
                            keyword: keyword.clone(),
                            first: first.to_string(),
                            second: variant.variant_id.clone(),
                        });
                    }
                    keyword_owner.insert(normalized, &variant.variant_id);
                }

                match service.endpoint_pattern {
                    EndpointPattern::PerVariant => {
                        if variant.endpoint.is_none() {
                            return Err(RegistryError::EndpointPatternMismatch {
                                service: name.as_str().to_string(),
                                detail: format!(
                                    "per_variant pattern requires an endpoint on '{}'",
                                    variant.variant_id
                                ),
                            });
                        }
                    }
                    EndpointPattern::Single | EndpointPattern::Typed => {
                        if variant.endpoint.is_some() {
                            return Err(RegistryError::EndpointPatternMismatch {
                                service: name.as_str().to_string(),
                                detail: format!(
                                    "variant '{}' must not carry its own endpoint",
                                    variant.variant_id
                                ),
                            });
                        }
                        if service.endpoint_pattern == EndpointPattern::Typed
                            && variant.analytics.is_none()
                        {
                            return Err(RegistryError::EndpointPatternMismatch {
                                service: name.as_str().to_string(),
                                detail: format!(
                                    "typed variant '{}' needs analytics parameters",
                                    variant.variant_id
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Find a variant and its owning service by id.
    pub fn variant(&self, variant_id: &str) -> Option<(ServiceName, &ServiceConfig, &Variant)> {
        for (name, service) in &self.services {
            if let Some(variant) = service.variants.iter().find(|v| v.variant_id == variant_id) {
                return Some((*name, service, variant));
            }
        }
        None
    }

    pub fn service(&self, name: ServiceName) -> Option<&ServiceConfig> {
        self.services.get(&name)
    }

    /// All variants across services, ascending by classification priority.
    /// The classifier scans keywords in this order.
    pub fn variants_by_priority(&self) -> Vec<(ServiceName, &Variant)> {
        let mut variants: Vec<(ServiceName, &Variant)> = self
            .services
            .iter()
            .flat_map(|(name, service)| service.variants.iter().map(|v| (*name, v)))
            .collect();
        variants.sort_by_key(|(_, v)| (v.classification.priority, v.variant_id.clone()));
        variants
    }

    /// Content (L25) variants only, ascending by priority.
    pub fn content_variants(&self) -> Vec<(ServiceName, &Variant)> {
        self.variants_by_priority()
            .into_iter()
            .filter(|(_, v)| v.classification.layout_id == LayoutId::L25)
            .collect()
    }

    /// Hero (L29) variant for a hero slide-type ("title", "section",
    /// "closing"), when the registry carries one.
    pub fn hero_variant(&self, slide_type: &str) -> Option<(ServiceName, &Variant)> {
        self.variants_by_priority().into_iter().find(|(_, v)| {
            v.classification.layout_id == LayoutId::L29 && v.classification.slide_type == slide_type
        })
    }

    /// The content fallback used when no keyword matches.
    pub fn fallback_variant(&self) -> Option<(ServiceName, &Variant)> {
        if let Some(found) = self
            .variants_by_priority()
            .into_iter()
            .find(|(_, v)| v.variant_id == "single_column")
        {
            return Some(found);
        }
        self.content_variants().into_iter().next()
    }
}
