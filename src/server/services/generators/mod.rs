pub mod error;
pub mod service;
pub mod types;

pub use error::{FailureCategory, GeneratorError};
pub use service::GeneratorClient;
pub use types::{
    AnalyticsContent, GeneratedSlideContent, GenerationRequest, IllustrationContent, TextContent,
};
