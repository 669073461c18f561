use std::path::PathBuf;

/// Application configuration DTO (pure data, no logic).
///
/// Empty strings and zero values are facts, not errors. The application
/// layer decides what an empty value means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Model used for a fresh session.
    pub default_model: String,
    /// Lighter model used after a transient provider failure.
    pub fallback_model: String,
    /// Warm-up before the initial stream opens, in milliseconds.
    pub warmup_ms: u64,
    pub system_prompt: String,
    pub default_prompt: String,
    /// Page opened when the user starts the chat key ritual.
    pub chat_key_page_url: String,
    /// Prefix of the reverse image search link.
    pub lens_search_base_url: String,
    /// Log directory (path info only, no existence check).
    pub log_directory: PathBuf,
}

impl AppConfig {
    /// Create AppConfig from a TOML value.
    pub fn from_toml(toml_value: &toml::Value) -> anyhow::Result<Self> {
        let str_at = |section: &str, key: &str| -> String {
            toml_value
                .get(section)
                .and_then(|s| s.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };

        let warmup_ms = match toml_value
            .get("chat")
            .and_then(|c| c.get("warmup_ms"))
            .and_then(|v| v.as_integer())
        {
            Some(ms) => u64::try_from(ms)
                .map_err(|_| anyhow::anyhow!("chat.warmup_ms must not be negative: {ms}"))?,
            None => 0,
        };

        Ok(Self {
            default_model: str_at("chat", "default_model"),
            fallback_model: str_at("chat", "fallback_model"),
            warmup_ms,
            system_prompt: str_at("chat", "system_prompt"),
            default_prompt: str_at("chat", "default_prompt"),
            chat_key_page_url: str_at("providers", "chat_key_page_url"),
            lens_search_base_url: str_at("lens", "search_base_url"),
            log_directory: PathBuf::from(str_at("logging", "directory")),
        })
    }

    /// Create an empty AppConfig (all empty/zero values).
    pub fn empty() -> Self {
        Self {
            default_model: String::new(),
            fallback_model: String::new(),
            warmup_ms: 0,
            system_prompt: String::new(),
            default_prompt: String::new(),
            chat_key_page_url: String::new(),
            lens_search_base_url: String::new(),
            log_directory: PathBuf::new(),
        }
    }
}
