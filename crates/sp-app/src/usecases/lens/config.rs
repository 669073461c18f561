use sp_core::AppConfig;

const DEFAULT_SEARCH_BASE_URL: &str = "https://lens.google.com/uploadbyurl?url=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LensConfig {
    /// Prefix the percent-encoded public image URL is appended to.
    pub search_base_url: String,
}

impl LensConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let search_base_url = if config.lens_search_base_url.trim().is_empty() {
            DEFAULT_SEARCH_BASE_URL.to_string()
        } else {
            config.lens_search_base_url.clone()
        };
        Self { search_base_url }
    }

    /// Search link for an image already hosted at `public_url`.
    pub fn search_url_for(&self, public_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(public_url.as_bytes()).collect();
        format!("{}{}", self.search_base_url, encoded)
    }
}

impl Default for LensConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::empty())
    }
}
