use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use tracing::debug;

use crate::server::models::LayoutId;
use crate::server::registry::{EndpointPattern, ServiceConfig, ServiceName, Variant};

use super::error::GeneratorError;
use super::types::{
    AnalyticsContent, GeneratedSlideContent, GenerationRequest, IllustrationContent, TextContent,
};

/// HTTP client for one generator service family. The endpoint pattern and
/// timeout come from the registry; the client is built once at startup.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    client: Client,
    service: ServiceName,
    config: ServiceConfig,
}

impl GeneratorClient {
    pub fn new(service: ServiceName, config: ServiceConfig) -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            service,
            config,
        }
    }

    pub fn service(&self) -> ServiceName {
        self.service
    }

    /// Resolve the request URL for a variant under this service's endpoint
    /// pattern.
    pub fn endpoint_for(&self, variant: &Variant) -> Result<String, GeneratorError> {
        let path = match self.config.endpoint_pattern {
            EndpointPattern::Single => self
                .config
                .endpoint
                .clone()
                .ok_or_else(|| GeneratorError::Validation("missing service endpoint".into()))?,
            EndpointPattern::PerVariant => variant.endpoint.clone().ok_or_else(|| {
                GeneratorError::Validation(format!(
                    "variant '{}' has no endpoint",
                    variant.variant_id
                ))
            })?,
            EndpointPattern::Typed => {
                let template = self
                    .config
                    .endpoint
                    .clone()
                    .ok_or_else(|| GeneratorError::Validation("missing endpoint template".into()))?;
                let analytics = variant.analytics.as_ref().ok_or_else(|| {
                    GeneratorError::Validation(format!(
                        "variant '{}' has no analytics parameters",
                        variant.variant_id
                    ))
                })?;
                let layout = match variant.classification.layout_id {
                    LayoutId::L25 => "L25",
                    LayoutId::L29 => "L29",
                };
                template
                    .replace("{layout}", layout)
                    .replace("{analytics_type}", &analytics.analytics_type)
            }
        };
        Ok(format!("{}{}", self.config.base_url.trim_end_matches('/'), path))
    }

    /// One generation call. Never retries by itself; the scheduler wraps it
    /// in `call_with_retry`.
    pub async fn generate(
        &self,
        variant: &Variant,
        request: &GenerationRequest,
    ) -> Result<GeneratedSlideContent, GeneratorError> {
        let url = self.endpoint_for(variant)?;
        debug!(
            service = self.service.as_str(),
            slide = request.slide_number,
            %url,
            "generator call"
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| GeneratorError::from_reqwest(self.service.as_str(), &url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(500).collect();
            return Err(GeneratorError::Http {
                service: self.service.as_str().to_string(),
                status: status.as_u16(),
                body: excerpt,
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::from_reqwest(self.service.as_str(), &url, e))?;
        self.parse_content(value)
    }

    fn parse_content(
        &self,
        value: serde_json::Value,
    ) -> Result<GeneratedSlideContent, GeneratorError> {
        let parse_err = |e: serde_json::Error| GeneratorError::Parse {
            service: self.service.as_str().to_string(),
            detail: e.to_string(),
        };
        match self.service {
            ServiceName::Text => {
                let content: TextContent = serde_json::from_value(value).map_err(parse_err)?;
                Ok(GeneratedSlideContent::Text(content))
            }
            ServiceName::Illustrator => {
                let content: IllustrationContent =
                    serde_json::from_value(value).map_err(parse_err)?;
                Ok(GeneratedSlideContent::Illustration(content))
            }
            ServiceName::Analytics => {
                let content: AnalyticsContent = serde_json::from_value(value).map_err(parse_err)?;
                Ok(GeneratedSlideContent::Analytics(content))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::Registry;

    fn registry() -> Registry {
        Registry::from_str(include_str!("../../../../config/taxonomy.json")).unwrap()
    }

    #[test]
    fn single_pattern_resolves_service_endpoint() {
        let registry = registry();
        let config = registry.service(ServiceName::Text).unwrap().clone();
        let client = GeneratorClient::new(ServiceName::Text, config);
        let (_, _, variant) = registry.variant("single_column").unwrap();
        assert_eq!(
            client.endpoint_for(variant).unwrap(),
            "http://localhost:9101/api/v1/generate"
        );
    }

    #[test]
    fn per_variant_pattern_resolves_variant_endpoint() {
        let registry = registry();
        let config = registry.service(ServiceName::Illustrator).unwrap().clone();
        let client = GeneratorClient::new(ServiceName::Illustrator, config);
        let (_, _, variant) = registry.variant("pyramid").unwrap();
        assert_eq!(
            client.endpoint_for(variant).unwrap(),
            "http://localhost:9102/pyramid/generate"
        );
    }

    #[test]
    fn typed_pattern_substitutes_path_parameters() {
        let registry = registry();
        let config = registry.service(ServiceName::Analytics).unwrap().clone();
        let client = GeneratorClient::new(ServiceName::Analytics, config);
        let (_, _, variant) = registry.variant("line_chart").unwrap();
        assert_eq!(
            client.endpoint_for(variant).unwrap(),
            "http://localhost:9103/analytics/L25/line"
        );
    }
}
