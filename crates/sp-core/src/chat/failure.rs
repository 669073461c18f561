//! Classification of chat provider failures.

const RATE_LIMIT_MARKER: &str = "429";
const UNAVAILABLE_MARKER: &str = "503";

/// A chat provider failure, classified by the status it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    RateLimited,
    Unavailable,
    Other(String),
}

impl ProviderFailure {
    pub fn classify(message: &str) -> Self {
        if message.contains(RATE_LIMIT_MARKER) {
            ProviderFailure::RateLimited
        } else if message.contains(UNAVAILABLE_MARKER) {
            ProviderFailure::Unavailable
        } else {
            ProviderFailure::Other(message.to_string())
        }
    }

    /// Rate limits and outages are worth one retry on a lighter model.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderFailure::RateLimited | ProviderFailure::Unavailable
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            ProviderFailure::RateLimited => "Quota limit reached or server busy.".to_string(),
            ProviderFailure::Unavailable => "Service temporarily unavailable.".to_string(),
            ProviderFailure::Other(message) if message.trim().is_empty() => {
                "Failed to connect to Gemini.".to_string()
            }
            ProviderFailure::Other(message) => message.clone(),
        }
    }
}
