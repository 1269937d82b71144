//! Error types for ragweave operations
//!
//! Every component converts its low-level failures into `RagweaveError`
//! before crossing a public API boundary. The transport layer above the
//! core maps these kinds onto HTTP statuses.

use thiserror::Error;

/// Categories of API-key failures, inferred from provider responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyErrorKind {
    /// No key is configured for the provider
    NotFound,
    /// The key was rejected by the provider
    Invalid,
    /// The key has expired
    Expired,
    /// The provider rate-limited the request
    RateLimited,
    /// Live validation did not complete within its deadline
    ValidationTimeout,
    /// Transport-level failure talking to the provider
    NetworkError,
}

impl std::fmt::Display for ApiKeyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::RateLimited => "rate_limited",
            Self::ValidationTimeout => "validation_timeout",
            Self::NetworkError => "network_error",
        };
        f.write_str(s)
    }
}

/// Comprehensive error enum for all ragweave operations
#[derive(Debug, Error)]
pub enum RagweaveError {
    /// A referenced resource does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource (bot, snapshot, operation, ...)
        resource: &'static str,
        /// Identifier that failed to resolve
        id: String,
    },

    /// The caller lacks the required role or ownership
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Human-readable explanation
        message: String,
    },

    /// API-key resolution or validation failure
    #[error("API key error ({kind}) for {provider}: {message}")]
    ApiKey {
        /// Categorized failure kind
        kind: ApiKeyErrorKind,
        /// Provider the key was for
        provider: String,
        /// Human-readable explanation
        message: String,
        /// Ordered, deduplicated remediation steps
        remediation: Vec<String>,
    },

    /// Bad input rejected at the API surface
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Vector search failed on every attempted threshold
    #[error("Retrieval error: {message}")]
    Retrieval {
        /// Last underlying failure
        message: String,
    },

    /// Both the LLM and the retrieval side produced nothing usable
    #[error("Blending error: {message}")]
    Blending {
        /// Why no response could be synthesized
        message: String,
    },

    /// Integrity verification found CRITICAL issues
    #[error("Integrity check failure: {message}")]
    Integrity {
        /// Summary of the critical issues
        message: String,
    },

    /// Duplicate operation id or a full queue
    #[error("Operation conflict: {message}")]
    Conflict {
        /// What conflicted
        message: String,
    },

    /// A deadline was exceeded
    #[error("Timeout after {seconds:.1}s in {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Configured deadline in seconds
        seconds: f64,
    },

    /// Storage backend failure (vector store, KV, repositories, disk)
    #[error("Storage error: {message}")]
    Storage {
        /// Underlying failure description
        message: String,
    },

    /// Provider capability failure outside the API-key taxonomy
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Underlying failure description
        message: String,
    },
}

impl RagweaveError {
    /// Shorthand for a storage failure wrapping any displayable source.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }

    /// Shorthand for a not-found failure.
    pub fn not_found(resource: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, RagweaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagweaveError::not_found("bot", "abc");
        assert_eq!(err.to_string(), "bot not found: abc");

        let err = RagweaveError::Timeout {
            operation: "query".to_string(),
            seconds: 10.0,
        };
        assert!(err.to_string().contains("10.0s"));
    }

    #[test]
    fn test_api_key_kind_serde() {
        let kind = ApiKeyErrorKind::RateLimited;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!(kind.to_string(), "rate_limited");
    }
}
