use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::debug;

use super::{CompletionRequest, GatewayMetadata, LlmConfig, LlmError, LlmGateway};

/// HTTP gateway to the model provider, speaking the OpenAI-compatible
/// chat-completions shape the provider proxies expose.
#[derive(Debug, Clone)]
pub struct VertexService {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl VertexService {
    pub fn new(api_key: String) -> Self {
        Self::with_config(LlmConfig {
            api_key,
            ..LlmConfig::default()
        })
    }

    pub fn with_config(config: LlmConfig) -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = config
            .base_url
            .unwrap_or_else(|| "https://vertex-gateway.local/v1".to_string());

        Self {
            client,
            api_key: config.api_key,
            base_url,
            default_model: config
                .default_model
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        }
    }
}

#[async_trait]
impl LlmGateway for VertexService {
    fn metadata(&self) -> GatewayMetadata {
        GatewayMetadata {
            name: "Vertex".to_string(),
            default_model: self.default_model.clone(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };
        debug!(%model, temperature = request.temperature, "llm completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": model,
                "messages": [
                    { "role": "system", "content": request.system },
                    { "role": "user", "content": request.prompt }
                ],
                "temperature": request.temperature,
                "stream": false
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimitExceeded(body));
            }
            return Err(LlmError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LlmError::ParseError("Failed to parse response content".to_string())
            })?
            .to_string();

        Ok(content)
    }
}
