pub mod config;
pub mod error;
pub mod service;

pub use config::LlmConfig;
pub use error::LlmError;
pub use service::VertexService;

use async_trait::async_trait;

/// A single LLM completion request. The orchestrator never depends on which
/// concrete model serves it; stage-specific model ids come from settings.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct GatewayMetadata {
    pub name: String,
    pub default_model: String,
}

/// The seam between the dialog machine and the natural-language provider.
/// Tests plug in scripted implementations.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    fn metadata(&self) -> GatewayMetadata;

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}
