//! Error types for Mindful Match.

use std::time::Duration;

use uuid::Uuid;

use crate::assessment::model::AnalysisKind;
use crate::assessment::policy::PolicyError;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Failures of the external reasoning service boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The service could not be reached or refused the request.
    #[error("{call} unavailable: {reason}")]
    Unavailable { call: AnalysisKind, reason: String },

    #[error("{call} timed out after {after:?}")]
    Timeout { call: AnalysisKind, after: Duration },

    /// The service answered, but not in the declared shape.
    #[error("{call} returned a malformed response: {reason}")]
    ContractViolation { call: AnalysisKind, reason: String },
}

impl GatewayError {
    pub fn call(&self) -> AnalysisKind {
        match self {
            Self::Unavailable { call, .. }
            | Self::Timeout { call, .. }
            | Self::ContractViolation { call, .. } => *call,
        }
    }
}

/// Errors surfaced by the orchestrator to its callers (HTTP, CLI).
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("Assessment {id} not found")]
    NotFound { id: Uuid },

    #[error("Assessment {id} is still processing the previous turn")]
    TurnInFlight { id: Uuid },

    #[error("Input rejected: {0}")]
    Rejected(#[from] PolicyError),

    /// The turn's task was cancelled before it finished (runtime shutdown).
    #[error("Assessment {id} turn was interrupted")]
    Interrupted { id: Uuid },
}

/// Front-end channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),

    #[error(transparent)]
    Assessment(#[from] AssessmentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_reports_its_call() {
        let err = GatewayError::ContractViolation {
            call: AnalysisKind::GroupInference,
            reason: "expected 2 groups, got 3".to_string(),
        };
        assert_eq!(err.call(), AnalysisKind::GroupInference);
        assert!(err.to_string().contains("expected 2 groups"));

        let err = GatewayError::Timeout {
            call: AnalysisKind::ReportSynthesis,
            after: Duration::from_secs(30),
        };
        assert_eq!(err.call(), AnalysisKind::ReportSynthesis);
    }

    #[test]
    fn channel_error_wraps_its_sources() {
        let id = Uuid::new_v4();
        let err: ChannelError = AssessmentError::TurnInFlight { id }.into();
        assert!(matches!(err, ChannelError::Assessment(_)));
        assert!(err.to_string().contains("still processing"));

        let err: ChannelError = DatabaseError::Query("locked".into()).into();
        assert_eq!(err.to_string(), "Query failed: locked");
    }
}
