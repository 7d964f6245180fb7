use thiserror::Error;

use crate::server::services::retry::{classify_message, Classify, RetryClass};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),
}

impl Classify for LlmError {
    fn retry_class(&self) -> RetryClass {
        match self {
            LlmError::RateLimitExceeded(_) | LlmError::Timeout | LlmError::Connection(_) => {
                RetryClass::Retryable
            }
            LlmError::RequestFailed { status, body } => {
                if *status == 429 || *status >= 500 {
                    RetryClass::Retryable
                } else {
                    classify_message(body)
                }
            }
            LlmError::ParseError(_) => RetryClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Connection(err.to_string())
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}
