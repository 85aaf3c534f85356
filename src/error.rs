//! Domain-specific error types for the decision pipeline

use axum::http::StatusCode;
use thiserror::Error;

/// A retry ceiling was reached; carries the last underlying failure.
#[derive(Error, Debug)]
#[error("{operation} gave up after {attempts} attempts: {last_error}")]
pub struct ExhaustedRetries {
    pub operation: String,
    pub attempts: u32,
    #[source]
    pub last_error: Box<DecisionError>,
}

/// Main error type for the decisionator pipeline
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Embedding service error: {source}")]
    EmbeddingService {
        #[source]
        source: Box<DecisionError>,
    },

    #[error("No stored quote exceeds similarity {threshold} for query '{query}'")]
    NoMatchFound { query: String, threshold: f32 },

    #[error("Option extraction error: {message}")]
    OptionExtraction { message: String },

    #[error("Rewrite error: {message}")]
    Rewrite { message: String },

    #[error("Merge error: {message}")]
    Merge { message: String },

    #[error(transparent)]
    ExhaustedRetries(#[from] ExhaustedRetries),

    #[error("Generation service error: {message}")]
    Generation { message: String },

    #[error("Structured output parse error: {message}")]
    Parse { message: String },

    #[error("Embedding provider error: {message}")]
    Embedding { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Request cancelled during {operation}")]
    Cancelled { operation: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DecisionError {
    /// Stable identifier used in error frames and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DecisionError::EmbeddingService { .. } => "embedding_service_error",
            DecisionError::NoMatchFound { .. } => "no_match_found",
            DecisionError::OptionExtraction { .. } => "option_extraction_error",
            DecisionError::Rewrite { .. } => "rewrite_error",
            DecisionError::Merge { .. } => "merge_error",
            DecisionError::ExhaustedRetries(_) => "exhausted_retries",
            DecisionError::Generation { .. } => "generation_error",
            DecisionError::Parse { .. } => "parse_error",
            DecisionError::Embedding { .. } => "embedding_error",
            DecisionError::Config { .. } => "config_error",
            DecisionError::Database { .. } => "database_error",
            DecisionError::Serialization { .. } => "serialization_error",
            DecisionError::Timeout { .. } => "timeout",
            DecisionError::Cancelled { .. } => "cancelled",
            DecisionError::Validation { .. } => "validation_error",
            DecisionError::Internal { .. } => "internal_error",
        }
    }

    /// Status used when a request is rejected before its stream opens.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DecisionError::Validation { .. } => StatusCode::BAD_REQUEST,
            DecisionError::NoMatchFound { .. } => StatusCode::NOT_FOUND,
            DecisionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DecisionError::EmbeddingService { .. }
            | DecisionError::ExhaustedRetries(_)
            | DecisionError::Generation { .. }
            | DecisionError::Embedding { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The retry ceiling behind this error, looking through the embedding wrapper.
    pub fn exhausted_retries(&self) -> Option<&ExhaustedRetries> {
        match self {
            DecisionError::ExhaustedRetries(e) => Some(e),
            DecisionError::EmbeddingService { source } => source.exhausted_retries(),
            _ => None,
        }
    }

    /// Whether another attempt could succeed. Output the service did send is
    /// never retried, nor is a request that was invalid or cancelled.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DecisionError::Parse { .. }
                | DecisionError::Validation { .. }
                | DecisionError::Config { .. }
                | DecisionError::Cancelled { .. }
        )
    }

    /// Failures that belong to the shared infrastructure rather than to one query.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, DecisionError::NoMatchFound { .. })
    }
}

impl From<anyhow::Error> for DecisionError {
    fn from(err: anyhow::Error) -> Self {
        DecisionError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DecisionError {
    fn from(err: serde_json::Error) -> Self {
        DecisionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<surrealdb::Error> for DecisionError {
    fn from(err: surrealdb::Error) -> Self {
        DecisionError::Database {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for DecisionError {
    fn from(err: reqwest::Error) -> Self {
        DecisionError::Generation {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

/// Result type alias for decisionator operations
pub type Result<T> = std::result::Result<T, DecisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_retries_is_visible_through_embedding_wrapper() {
        let err = DecisionError::EmbeddingService {
            source: Box::new(DecisionError::ExhaustedRetries(ExhaustedRetries {
                operation: "embed".into(),
                attempts: 10,
                last_error: Box::new(DecisionError::Embedding {
                    message: "503".into(),
                }),
            })),
        };
        assert_eq!(err.kind(), "embedding_service_error");
        assert_eq!(err.exhausted_retries().map(|e| e.attempts), Some(10));
        assert!(err.to_string().contains("gave up after 10 attempts"));
    }

    #[test]
    fn no_match_is_not_infrastructure() {
        let err = DecisionError::NoMatchFound {
            query: "stay".into(),
            threshold: 0.6,
        };
        assert!(!err.is_infrastructure());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(
            DecisionError::Cancelled {
                operation: "embed".into()
            }
            .is_infrastructure()
        );
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(
            DecisionError::Generation {
                message: "502".into()
            }
            .is_retryable()
        );
        assert!(
            DecisionError::Embedding {
                message: "503".into()
            }
            .is_retryable()
        );
        assert!(
            !DecisionError::Parse {
                message: "not json".into()
            }
            .is_retryable()
        );
        assert!(
            !DecisionError::Cancelled {
                operation: "embed".into()
            }
            .is_retryable()
        );
    }
}
