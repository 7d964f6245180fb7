use thiserror::Error;

use crate::server::services::retry::{classify_message, Classify, RetryClass};

/// Failure taxonomy for generator calls. Every Stage-6 failure record
/// carries one of these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    Http4xx,
    Http5xx,
    Connection,
    Validation,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "timeout",
            FailureCategory::Http4xx => "http_4xx",
            FailureCategory::Http5xx => "http_5xx",
            FailureCategory::Connection => "connection",
            FailureCategory::Validation => "validation",
            FailureCategory::Unknown => "unknown",
        }
    }

    /// Operator-facing remediation hint attached to failure records.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => {
                "Increase the service timeout or check generator responsiveness"
            }
            FailureCategory::Http4xx => "Inspect the request payload; the service rejected it",
            FailureCategory::Http5xx => "Check generator service health and logs",
            FailureCategory::Connection => "Verify the service base URL and network reachability",
            FailureCategory::Validation => "Fix the slide specification or registry entry",
            FailureCategory::Unknown => "Inspect the raw error and generator logs",
        }
    }
}

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("{service} returned {status}: {body}")]
    Http {
        service: String,
        status: u16,
        body: String,
    },

    #[error("connection to {service} failed: {detail}")]
    Connection { service: String, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no client configured for service '{0}'")]
    MissingClient(String),

    #[error("failed to parse {service} response: {detail}")]
    Parse { service: String, detail: String },
}

impl GeneratorError {
    pub fn category(&self) -> FailureCategory {
        match self {
            GeneratorError::Timeout { .. } => FailureCategory::Timeout,
            GeneratorError::Http { status, .. } if *status >= 500 => FailureCategory::Http5xx,
            GeneratorError::Http { .. } => FailureCategory::Http4xx,
            GeneratorError::Connection { .. } => FailureCategory::Connection,
            GeneratorError::Validation(_) | GeneratorError::MissingClient(_) => {
                FailureCategory::Validation
            }
            GeneratorError::Parse { .. } => FailureCategory::Unknown,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            GeneratorError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn from_reqwest(service: &str, endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeneratorError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err.is_connect() {
            GeneratorError::Connection {
                service: service.to_string(),
                detail: err.to_string(),
            }
        } else if err.is_decode() {
            GeneratorError::Parse {
                service: service.to_string(),
                detail: err.to_string(),
            }
        } else {
            GeneratorError::Connection {
                service: service.to_string(),
                detail: err.to_string(),
            }
        }
    }
}

impl Classify for GeneratorError {
    fn retry_class(&self) -> RetryClass {
        match self {
            GeneratorError::Timeout { .. } | GeneratorError::Connection { .. } => {
                RetryClass::Retryable
            }
            GeneratorError::Http { status, body, .. } => {
                if *status == 429 || *status >= 500 {
                    RetryClass::Retryable
                } else {
                    classify_message(body)
                }
            }
            GeneratorError::Validation(_)
            | GeneratorError::MissingClient(_)
            | GeneratorError::Parse { .. } => RetryClass::Fatal,
        }
    }
}
