use sp_core::AppConfig;

const DEFAULT_CHAT_KEY_PAGE_URL: &str = "https://aistudio.google.com/app/apikey";

/// Settings of the credential flow, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Page opened when the chat key ritual starts.
    pub chat_key_page_url: String,
}

impl ProvisionerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let chat_key_page_url = if config.chat_key_page_url.trim().is_empty() {
            DEFAULT_CHAT_KEY_PAGE_URL.to_string()
        } else {
            config.chat_key_page_url.clone()
        };
        Self { chat_key_page_url }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::empty())
    }
}
