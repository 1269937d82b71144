//! API-key failure categorization and remediation guidance
//!
//! Error kinds are inferred from the provider's response text; each kind
//! carries remediation steps templated with the provider's name and
//! console URL.

use ragweave_core::error::ApiKeyErrorKind;
use serde::{Deserialize, Serialize};

/// Facts about a provider used to template user-facing guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Display name
    pub name: String,
    /// Console URL where keys are issued
    pub url: String,
    /// Documentation URL
    pub docs: String,
}

impl ProviderInfo {
    fn known(name: &str, url: &str, docs: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            docs: docs.to_string(),
        }
    }
}

/// Known provider console/doc locations.
#[must_use]
pub fn provider_info(provider: &str) -> ProviderInfo {
    match provider {
        "openai" => ProviderInfo::known(
            "OpenAI",
            "https://platform.openai.com/api-keys",
            "https://platform.openai.com/docs/quickstart",
        ),
        "anthropic" => ProviderInfo::known(
            "Anthropic",
            "https://console.anthropic.com/",
            "https://docs.anthropic.com/claude/docs",
        ),
        "gemini" => ProviderInfo::known(
            "Google Gemini",
            "https://makersuite.google.com/app/apikey",
            "https://ai.google.dev/docs",
        ),
        "openrouter" => ProviderInfo::known(
            "OpenRouter",
            "https://openrouter.ai/keys",
            "https://openrouter.ai/docs",
        ),
        other => ProviderInfo {
            name: capitalize(other),
            url: "the provider's website".to_string(),
            docs: "the provider's documentation".to_string(),
        },
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

/// One categorized failure from a resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyFailure {
    /// Inferred error kind
    pub kind: ApiKeyErrorKind,
    /// Provider the attempt was against
    pub provider: String,
    /// Source that was attempted (owner, caller, ...), when known
    pub source: Option<String>,
    /// Raw failure message
    pub message: String,
    /// Remediation steps for this kind
    pub remediation_steps: Vec<String>,
}

/// Infer the error kind and remediation steps from a provider failure
/// message.
#[must_use]
pub fn categorize_failure(provider: &str, message: &str) -> ApiKeyFailure {
    let info = provider_info(provider);
    let lower = message.to_lowercase();

    let (kind, remediation_steps) = if lower.contains("not found") || lower.contains("no api key")
    {
        (
            ApiKeyErrorKind::NotFound,
            vec![
                format!("Configure a {} API key in your profile settings", info.name),
                "Ensure the API key is active and not expired".to_string(),
                format!("Get an API key from: {}", info.url),
            ],
        )
    } else if lower.contains("invalid") || lower.contains("unauthorized") {
        (
            ApiKeyErrorKind::Invalid,
            vec![
                format!("Verify your {} API key is correct", info.name),
                "Check if the API key has the required permissions".to_string(),
                format!("Generate a new key at {} if the current one is compromised", info.url),
            ],
        )
    } else if lower.contains("expired") {
        (
            ApiKeyErrorKind::Expired,
            vec![
                format!("Generate a new {} API key at {}", info.name, info.url),
                "Update your profile with the new API key".to_string(),
            ],
        )
    } else if lower.contains("rate limit") || lower.contains("quota") {
        (
            ApiKeyErrorKind::RateLimited,
            vec![
                format!("Wait for {} rate limits to reset", info.name),
                format!("Consider upgrading your {} plan", info.name),
            ],
        )
    } else if lower.contains("timeout") || lower.contains("timed out") {
        (
            ApiKeyErrorKind::ValidationTimeout,
            vec![
                format!("Check network connectivity to {}", info.name),
                "Retry the operation after a brief delay".to_string(),
            ],
        )
    } else {
        (
            ApiKeyErrorKind::NetworkError,
            vec![
                "Check network connectivity".to_string(),
                format!("Verify {} service status", info.name),
                "Retry the operation".to_string(),
            ],
        )
    };

    ApiKeyFailure {
        kind,
        provider: provider.to_string(),
        source: None,
        message: message.to_string(),
        remediation_steps,
    }
}

/// Compose the terminal error message from every failure accumulated
/// during resolution: a summary plus an order-preserving, deduplicated
/// remediation list (capped at five steps).
#[must_use]
pub fn composite_message(provider: &str, failures: &[ApiKeyFailure]) -> (String, Vec<String>) {
    let summary = format!("Failed to resolve API key for {provider} after trying multiple sources.");

    let mut seen = std::collections::HashSet::new();
    let steps: Vec<String> = failures
        .iter()
        .flat_map(|f| f.remediation_steps.iter().cloned())
        .filter(|step| seen.insert(step.clone()))
        .take(5)
        .collect();

    (summary, steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_kinds() {
        assert_eq!(
            categorize_failure("openai", "No API key configured").kind,
            ApiKeyErrorKind::NotFound
        );
        assert_eq!(
            categorize_failure("openai", "401 Unauthorized").kind,
            ApiKeyErrorKind::Invalid
        );
        assert_eq!(
            categorize_failure("gemini", "key expired").kind,
            ApiKeyErrorKind::Expired
        );
        assert_eq!(
            categorize_failure("openai", "rate limit exceeded").kind,
            ApiKeyErrorKind::RateLimited
        );
        assert_eq!(
            categorize_failure("openai", "validation timed out").kind,
            ApiKeyErrorKind::ValidationTimeout
        );
        assert_eq!(
            categorize_failure("openai", "connection reset").kind,
            ApiKeyErrorKind::NetworkError
        );
    }

    #[test]
    fn test_remediation_mentions_provider_url() {
        let failure = categorize_failure("gemini", "no api key");
        assert!(failure
            .remediation_steps
            .iter()
            .any(|s| s.contains("makersuite.google.com")));
    }

    #[test]
    fn test_composite_dedup_preserves_order() {
        let a = categorize_failure("openai", "no api key");
        let b = categorize_failure("openai", "no api key");
        let c = categorize_failure("openai", "401 unauthorized");

        let (summary, steps) = composite_message("openai", &[a.clone(), b, c]);
        assert!(summary.contains("openai"));
        // Duplicates removed, first-seen order kept, capped at 5
        assert_eq!(steps[0], a.remediation_steps[0]);
        assert_eq!(steps.len(), 5);
        let unique: std::collections::HashSet<_> = steps.iter().collect();
        assert_eq!(unique.len(), steps.len());
    }
}
