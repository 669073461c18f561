//! Configuration resolution at startup.
//!
//! Only decides which file to read and where logs go. Defaults for empty
//! values belong to the use cases.

use std::path::{Path, PathBuf};

use sp_core::AppConfig;
use sp_infra::config::{default_config_path, default_log_dir, load_config};
use tracing::debug;

/// Load `config_path`, or the platform default path when `None`.
///
/// A file that does not exist yields [`AppConfig::empty`]; a file that
/// exists but cannot be read or parsed is an error.
pub fn load_or_empty(config_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = config_path.map(Path::to_path_buf).or_else(default_config_path);
    match path {
        Some(path) if path.exists() => load_config(&path),
        Some(path) => {
            debug!(path = %path.display(), "no config file, using empty config");
            Ok(AppConfig::empty())
        }
        None => Ok(AppConfig::empty()),
    }
}

/// The configured log directory, or the platform default.
pub fn resolve_log_dir(config: &AppConfig) -> Option<PathBuf> {
    if config.log_directory.as_os_str().is_empty() {
        default_log_dir()
    } else {
        Some(config.log_directory.clone())
    }
}
