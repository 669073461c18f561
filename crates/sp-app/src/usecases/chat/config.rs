use std::time::Duration;

use sp_core::AppConfig;

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const FALLBACK_MODEL: &str = "gemini-flash-lite-latest";
const DEFAULT_WARMUP: Duration = Duration::from_millis(3000);
const DEFAULT_SYSTEM_PROMPT: &str = "You are a visual assistant. Describe what the image shows, \
point out anything that looks wrong, and suggest concrete fixes. Answer in Markdown.";
const DEFAULT_PROMPT: &str =
    "Analyze this image and explain it or discuss fixes about the issue it describes.";

/// Chat settings with defaults applied to empty configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub default_model: String,
    /// Lighter model used for the single retry after a transient failure.
    pub fallback_model: String,
    /// Delay before the first stream opens; covers the loading shimmer.
    pub warmup: Duration,
    pub system_prompt: String,
    /// Prompt used when the user did not type one.
    pub default_prompt: String,
}

impl ChatConfig {
    /// A zero `warmup_ms` means "not configured" and gets the default.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            default_model: or_default(&config.default_model, DEFAULT_MODEL),
            fallback_model: or_default(&config.fallback_model, FALLBACK_MODEL),
            warmup: if config.warmup_ms == 0 {
                DEFAULT_WARMUP
            } else {
                Duration::from_millis(config.warmup_ms)
            },
            system_prompt: or_default(&config.system_prompt, DEFAULT_SYSTEM_PROMPT),
            default_prompt: or_default(&config.default_prompt, DEFAULT_PROMPT),
        }
    }

    /// Prompt sent with the image on the initial stream.
    pub fn compose_prompt(&self, prompt: &str) -> String {
        format!(
            "<sys-prmp>\n{}\n</sys-prmp>\nMSS: {}",
            self.system_prompt, prompt
        )
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::empty())
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
