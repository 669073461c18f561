pub mod config;
pub mod wiring;

use std::path::Path;

use sp_core::AppConfig;
use sp_infra::bootstrap::init_tracing_subscriber;

pub use config::{load_or_empty, resolve_log_dir};
pub use wiring::wire;

/// Load configuration and install the tracing subscriber.
///
/// Call once per process, before [`wire`].
pub fn init(config_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = load_or_empty(config_path)?;
    let log_dir = resolve_log_dir(&config);
    init_tracing_subscriber(log_dir.as_deref())?;
    tracing::info!(
        log_dir = ?log_dir,
        "spatialshot session core initialized"
    );
    Ok(config)
}
