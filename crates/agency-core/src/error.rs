//! Error types for the agency CRM

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgencyError>;

/// Every payload is a plain string so results can be cloned and handed to
/// several waiters of the same deduplicated request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgencyError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Plan limit reached: {0}")]
    LimitExceeded(String),

    #[error("Form logic loops back to question {0}")]
    LogicCycle(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction '{step}' failed: {message}")]
    Transaction { step: String, message: String },

    #[error("Config error: {0}")]
    Config(String),
}

impl AgencyError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        AgencyError::NotFound(format!("{} '{}'", entity, id))
    }

    /// Stable snake_case identifier used in error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            AgencyError::NotFound(_) => "not_found",
            AgencyError::Validation(_) => "validation_error",
            AgencyError::Unauthorized(_) => "unauthorized",
            AgencyError::Forbidden(_) => "forbidden",
            AgencyError::Conflict(_) => "conflict",
            AgencyError::LimitExceeded(_) => "limit_exceeded",
            AgencyError::LogicCycle(_) => "logic_cycle",
            AgencyError::Storage(_) => "storage_error",
            AgencyError::Upstream { .. } => "upstream_error",
            AgencyError::Serialization(_) => "serialization_error",
            AgencyError::Transaction { .. } => "transaction_failed",
            AgencyError::Config(_) => "config_error",
        }
    }
}

impl From<serde_json::Error> for AgencyError {
    fn from(e: serde_json::Error) -> Self {
        AgencyError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = AgencyError::not_found("Form", "abc");
        assert_eq!(err.to_string(), "Form 'abc' not found");
        assert_eq!(err.code(), "not_found");
    }
}
