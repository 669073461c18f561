//! Process-wide clipboard capture watcher.

use sp_core::ProviderKind;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::ProvisionError;
use crate::host::HostClient;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStart {
    Started,
    /// The same provider's ritual was already running; nothing changed.
    AlreadyActive,
}

/// Owns the single host clipboard watcher.
///
/// ## Behavior
/// - At most one watcher is active, tagged with the provider whose ritual
///   started it.
/// - `start` for the active provider and `stop` while inactive are no-ops.
/// - `start` while another provider's ritual is active is rejected, as is a
///   `start` that races another transition.
pub struct CaptureWatcher {
    host: HostClient,
    active: watch::Sender<Option<ProviderKind>>,
    transition: Mutex<()>,
}

impl CaptureWatcher {
    pub fn new(host: HostClient) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            host,
            active,
            transition: Mutex::new(()),
        }
    }

    pub async fn start(&self, provider: ProviderKind) -> Result<WatcherStart, ProvisionError> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| ProvisionError::Busy)?;

        let current = self.active_provider();
        match current {
            Some(active) if active == provider => {
                debug!(%provider, "capture watcher already active");
                return Ok(WatcherStart::AlreadyActive);
            }
            Some(active) => return Err(ProvisionError::RitualInFlight { active }),
            None => {}
        }

        self.host.start_clipboard_watcher().await?;
        self.active.send_replace(Some(provider));
        info!(%provider, "capture watcher started");
        Ok(WatcherStart::Started)
    }

    /// Stop the watcher. Returns whether one was running.
    ///
    /// Waits for an in-flight start so teardown never leaves a watcher
    /// behind. A failed stop keeps the watcher marked active.
    pub async fn stop(&self) -> Result<bool, ProvisionError> {
        let _guard = self.transition.lock().await;

        let Some(provider) = self.active_provider() else {
            return Ok(false);
        };

        self.host.stop_clipboard_watcher().await?;
        self.active.send_replace(None);
        info!(%provider, "capture watcher stopped");
        Ok(true)
    }

    /// Stop the watcher only if `provider`'s ritual owns it.
    pub async fn stop_for(&self, provider: ProviderKind) -> Result<bool, ProvisionError> {
        let _guard = self.transition.lock().await;

        if self.active_provider() != Some(provider) {
            return Ok(false);
        }

        self.host.stop_clipboard_watcher().await?;
        self.active.send_replace(None);
        info!(%provider, "capture ritual cancelled");
        Ok(true)
    }

    pub fn active_provider(&self) -> Option<ProviderKind> {
        *self.active.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.active_provider().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_core::host::commands;
    use sp_infra::LoopbackBridge;
    use std::sync::Arc;

    fn watcher() -> (LoopbackBridge, CaptureWatcher) {
        let bridge = LoopbackBridge::new();
        bridge.reply_with(commands::START_CLIPBOARD_WATCHER, serde_json::Value::Null);
        bridge.reply_with(commands::STOP_CLIPBOARD_WATCHER, serde_json::Value::Null);
        let host = HostClient::new(Arc::new(bridge.clone()));
        (bridge, CaptureWatcher::new(host))
    }

    #[tokio::test]
    async fn start_twice_keeps_one_watcher() {
        let (bridge, watcher) = watcher();

        let first = watcher.start(ProviderKind::ChatProvider).await.unwrap();
        let second = watcher.start(ProviderKind::ChatProvider).await.unwrap();

        assert_eq!(first, WatcherStart::Started);
        assert_eq!(second, WatcherStart::AlreadyActive);
        assert_eq!(bridge.call_count(commands::START_CLIPBOARD_WATCHER), 1);
        assert_eq!(watcher.active_provider(), Some(ProviderKind::ChatProvider));
    }

    #[tokio::test]
    async fn stop_while_inactive_is_a_no_op() {
        let (bridge, watcher) = watcher();

        assert!(!watcher.stop().await.unwrap());
        assert_eq!(bridge.call_count(commands::STOP_CLIPBOARD_WATCHER), 0);
    }

    #[tokio::test]
    async fn other_provider_is_rejected_while_active() {
        let (bridge, watcher) = watcher();
        watcher.start(ProviderKind::ChatProvider).await.unwrap();

        let err = watcher
            .start(ProviderKind::ImageHostProvider)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::RitualInFlight {
                active: ProviderKind::ChatProvider
            }
        ));
        assert_eq!(bridge.call_count(commands::START_CLIPBOARD_WATCHER), 1);
    }

    #[tokio::test]
    async fn stop_then_start_for_another_provider() {
        let (_bridge, watcher) = watcher();
        watcher.start(ProviderKind::ChatProvider).await.unwrap();

        assert!(watcher.stop().await.unwrap());
        watcher.start(ProviderKind::ImageHostProvider).await.unwrap();

        assert_eq!(
            watcher.active_provider(),
            Some(ProviderKind::ImageHostProvider)
        );
    }

    #[tokio::test]
    async fn stop_for_leaves_other_rituals_running() {
        let (bridge, watcher) = watcher();
        watcher.start(ProviderKind::ChatProvider).await.unwrap();

        assert!(!watcher.stop_for(ProviderKind::ImageHostProvider).await.unwrap());
        assert_eq!(watcher.active_provider(), Some(ProviderKind::ChatProvider));

        assert!(watcher.stop_for(ProviderKind::ChatProvider).await.unwrap());
        assert!(!watcher.is_active());
        assert_eq!(bridge.call_count(commands::STOP_CLIPBOARD_WATCHER), 1);
    }

    #[tokio::test]
    async fn failed_start_leaves_watcher_inactive() {
        let (bridge, watcher) = watcher();
        bridge.fail_with(commands::START_CLIPBOARD_WATCHER, "clipboard busy");

        let err = watcher.start(ProviderKind::ChatProvider).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Host(_)));
        assert!(!watcher.is_active());
    }

    #[tokio::test]
    async fn failed_stop_keeps_watcher_marked_active() {
        let (bridge, watcher) = watcher();
        watcher.start(ProviderKind::ChatProvider).await.unwrap();
        bridge.fail_with(commands::STOP_CLIPBOARD_WATCHER, "gone");

        assert!(watcher.stop().await.is_err());
        assert!(watcher.is_active());
    }
}
