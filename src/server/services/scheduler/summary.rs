use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::server::services::generators::FailureCategory;

/// One slide that failed past the retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideFailure {
    pub slide_id: String,
    pub slide_number: u32,
    pub slide_type: String,
    pub service: String,
    pub endpoint: String,
    pub error: String,
    pub category: FailureCategory,
    pub suggested_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalIssue {
    pub severity: Severity,
    pub description: String,
}

/// Aggregated view over everything that went wrong (or was retried) during
/// one Stage-6 run. Returned alongside the success/failure arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Failure and absorbed-retry counts keyed by category name. Retries a
    /// call absorbed before succeeding count here too.
    pub by_category: BTreeMap<String, usize>,
    pub by_service: BTreeMap<String, usize>,
    pub by_endpoint: BTreeMap<String, usize>,
    pub critical_issues: Vec<CriticalIssue>,
    pub recommended_actions: Vec<String>,
}

impl ErrorSummary {
    pub fn is_clean(&self) -> bool {
        self.by_category.is_empty()
    }

    /// One-line digest for user-facing status messages.
    pub fn digest(&self) -> String {
        if self.is_clean() {
            return "all slides generated cleanly".to_string();
        }
        let categories: Vec<String> = self
            .by_category
            .iter()
            .map(|(category, count)| format!("{category}: {count}"))
            .collect();
        categories.join(", ")
    }
}

/// Builds the summary while the scheduler records outcomes.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    failures: Vec<SlideFailure>,
    absorbed_retries: BTreeMap<String, usize>,
    retried_services: BTreeMap<String, usize>,
    missing_clients: Vec<String>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, failure: SlideFailure) {
        if failure.category == FailureCategory::Validation
            && failure.error.contains("no client configured")
        {
            self.missing_clients.push(failure.service.clone());
        }
        self.failures.push(failure);
    }

    /// Retryable errors a call absorbed before eventually succeeding.
    pub fn record_absorbed_retries(&mut self, service: &str, category: FailureCategory, count: u32) {
        if count == 0 {
            return;
        }
        *self
            .absorbed_retries
            .entry(category.as_str().to_string())
            .or_default() += count as usize;
        *self.retried_services.entry(service.to_string()).or_default() += count as usize;
    }

    pub fn failures(&self) -> &[SlideFailure] {
        &self.failures
    }

    pub fn finish(self) -> (Vec<SlideFailure>, ErrorSummary) {
        let mut summary = ErrorSummary::default();

        for (category, count) in &self.absorbed_retries {
            *summary.by_category.entry(category.clone()).or_default() += count;
        }
        for (service, count) in &self.retried_services {
            *summary.by_service.entry(service.clone()).or_default() += count;
        }
        for failure in &self.failures {
            *summary
                .by_category
                .entry(failure.category.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_service
                .entry(failure.service.clone())
                .or_default() += 1;
            *summary
                .by_endpoint
                .entry(failure.endpoint.clone())
                .or_default() += 1;
        }

        for service in &self.missing_clients {
            summary.critical_issues.push(CriticalIssue {
                severity: Severity::High,
                description: format!("no client configured for service '{service}'"),
            });
        }
        let server_errors = self
            .failures
            .iter()
            .filter(|f| f.category == FailureCategory::Http5xx)
            .count();
        if server_errors >= 2 {
            summary.critical_issues.push(CriticalIssue {
                severity: Severity::High,
                description: format!("{server_errors} slides failed with 5xx responses"),
            });
        }
        let timeouts = self
            .failures
            .iter()
            .filter(|f| f.category == FailureCategory::Timeout)
            .count();
        if timeouts > 0 {
            summary.critical_issues.push(CriticalIssue {
                severity: Severity::Medium,
                description: format!("{timeouts} slide(s) timed out"),
            });
        }
        let client_errors = self
            .failures
            .iter()
            .filter(|f| f.category == FailureCategory::Http4xx)
            .count();
        if client_errors > 0 {
            summary.critical_issues.push(CriticalIssue {
                severity: Severity::Medium,
                description: format!("{client_errors} slide(s) rejected with 4xx responses"),
            });
        }

        // Recommended actions, high severity first, deduplicated.
        let mut actions: Vec<String> = Vec::new();
        for issue in &summary.critical_issues {
            let action = match issue.severity {
                Severity::High => format!("Investigate now: {}", issue.description),
                Severity::Medium => format!("Review: {}", issue.description),
            };
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        for failure in &self.failures {
            if !actions.contains(&failure.suggested_action) {
                actions.push(failure.suggested_action.clone());
            }
        }
        summary.recommended_actions = actions;

        (self.failures, summary)
    }
}
