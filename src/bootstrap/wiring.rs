//! Assembly of the session core.
//!
//! The only place that depends on `sp-app` and `sp-infra` together. It
//! builds, it does not decide.

use std::sync::Arc;

use sp_app::CoreServices;
use sp_core::ports::EventBridgePort;
use sp_core::AppConfig;
use sp_infra::SystemClock;

/// Build the session core on top of a host bridge, using the system clock.
pub fn wire(bridge: Arc<dyn EventBridgePort>, config: &AppConfig) -> CoreServices {
    CoreServices::new(bridge, Arc::new(SystemClock), config)
}
