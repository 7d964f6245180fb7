use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("VERTEX_API_KEY").unwrap_or_default(),
            base_url: std::env::var("VERTEX_API_URL").ok(),
            default_model: None,
            timeout_secs: Some(120),
        }
    }
}
