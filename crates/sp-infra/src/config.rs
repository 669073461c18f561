//! # Configuration Loader
//!
//! Reads the TOML file and maps it into the [`AppConfig`] DTO.
//!
//! Pure data loading only. Validation and default values belong to the
//! application layer.

use anyhow::Context;
use sp_core::config::AppConfig;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "spatialshot";

/// Load configuration from a TOML file.
///
/// Missing sections and keys become empty values.
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read (I/O error)
/// - Content is not valid TOML (parse error)
/// - A value has an impossible shape (negative warm-up)
pub fn load_config(config_path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let toml_value: toml::Value =
        toml::from_str(&content).context("Failed to parse config as TOML")?;
    AppConfig::from_toml(&toml_value)
}

/// `<config dir>/spatialshot/config.toml`, when the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
}

/// `<local data dir>/spatialshot/logs`, when the platform has one.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME).join("logs"))
}
