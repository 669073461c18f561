//! Wiring of the session core.

use std::sync::{Arc, Mutex};

use sp_core::ports::{ClockPort, EventBridgePort};
use sp_core::{AppConfig, AuthStage, ProviderKind};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::host::HostClient;
use crate::usecases::chat::{ChatConfig, ChatSessionEngine, SessionOutcome};
use crate::usecases::credentials::{CredentialProvisioner, ProvisionerConfig};
use crate::usecases::image_source::ActiveImageSource;
use crate::usecases::lens::{LensConfig, PrefetchCache};

/// One instance of every session component, sharing a single host client.
pub struct CoreServices {
    pub host: HostClient,
    pub provisioner: Arc<CredentialProvisioner>,
    pub chat: Arc<ChatSessionEngine>,
    pub lens: Arc<PrefetchCache>,
    pub images: Arc<ActiveImageSource>,
    image_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl CoreServices {
    pub fn new(
        bridge: Arc<dyn EventBridgePort>,
        clock: Arc<dyn ClockPort>,
        config: &AppConfig,
    ) -> Self {
        let host = HostClient::new(bridge);
        let provisioner = Arc::new(CredentialProvisioner::new(
            host.clone(),
            ProvisionerConfig::from_app_config(config),
        ));
        let chat = Arc::new(ChatSessionEngine::new(
            host.clone(),
            clock,
            ChatConfig::from_app_config(config),
        ));
        let lens = Arc::new(PrefetchCache::new(
            host.clone(),
            Arc::clone(&provisioner),
            LensConfig::from_app_config(config),
        ));
        let images = Arc::new(ActiveImageSource::new(host.clone()));

        Self {
            host,
            provisioner,
            chat,
            lens,
            images,
            image_forwarder: Mutex::new(None),
        }
    }

    /// Resolve the auth stage, load the startup image and keep the prefetch
    /// cache pointed at the active image.
    ///
    /// Image loading failures are logged; the session can still start
    /// without an image.
    pub async fn start(&self) -> AuthStage {
        let span = info_span!("usecase.core_services.start");
        async {
            let stage = self.provisioner.check_initial_status().await;

            if let Err(err) = self.images.load_startup_image().await {
                warn!(error = %err, "failed to load startup image");
            }
            if let Err(err) = self.images.follow_image_events().await {
                warn!(error = %err, "failed to follow image events");
            }

            let mut images = self.images.subscribe();
            let lens = Arc::clone(&self.lens);
            lens.set_image(images.borrow_and_update().clone());
            let forwarder = tokio::spawn(async move {
                while images.changed().await.is_ok() {
                    let image = images.borrow_and_update().clone();
                    lens.set_image(image);
                }
            });
            if let Some(previous) = lock(&self.image_forwarder).replace(forwarder) {
                previous.abort();
            }

            info!(?stage, "session core started");
            stage
        }
        .instrument(span)
        .await
    }

    /// Start a chat session about the active image with a fresh chat secret.
    ///
    /// A blank `prompt` uses the configured default prompt.
    pub async fn start_chat(&self, prompt: Option<&str>) -> SessionOutcome {
        let secret = self.provisioner.secret(ProviderKind::ChatProvider).await.ok();
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.chat.config().default_prompt)
            .to_string();
        let image = self.images.current();
        let model = self.chat.active_model();
        self.chat
            .start_session(secret.as_deref(), &model, image.as_ref(), Some(&prompt))
            .await
    }

    /// Dispose every listener and stop the capture watcher.
    pub async fn shutdown(&self) {
        let forwarder = lock(&self.image_forwarder).take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
            let _ = forwarder.await;
        }
        self.images.shutdown().await;
        self.lens.shutdown().await;
        self.chat.abandon_stream();
        self.provisioner.shutdown().await;
        info!("session core shut down");
    }
}

impl Drop for CoreServices {
    fn drop(&mut self) {
        if let Some(forwarder) = lock(&self.image_forwarder).take() {
            forwarder.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
