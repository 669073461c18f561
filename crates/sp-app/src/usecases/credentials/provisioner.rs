//! Credential provisioning orchestrator.
//!
//! Drives the auth stage machine and the capture ritual side effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sp_core::auth::{AuthEvent, AuthStage, AuthStateMachine, ClipboardCapture, ProviderKind};
use sp_core::host::{files, topics};
use sp_core::ports::EventSubscription;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{CaptureWatcher, ProvisionError, ProvisionerConfig, WatcherStart};
use crate::host::HostClient;

/// Observable provisioning state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerState {
    pub stage: AuthStage,
    /// Last failure of a credential operation, for display.
    pub error: Option<String>,
}

impl Default for ProvisionerState {
    fn default() -> Self {
        Self {
            stage: AuthStage::Loading,
            error: None,
        }
    }
}

/// Owns the auth stage and the capture watcher.
///
/// ## Behavior
/// - `check_initial_status` resolves `Loading` exactly once.
/// - Capture rituals are serialized through [`CaptureWatcher`].
/// - A capture is handled as: stop watcher, close capture surface (image
///   host only), persist, recompute stage. Nothing else reorders it.
/// - The capture listener is disposed and the watcher stopped on
///   [`CredentialProvisioner::shutdown`] or drop.
pub struct CredentialProvisioner {
    inner: Arc<Inner>,
}

struct Inner {
    host: HostClient,
    watcher: Arc<CaptureWatcher>,
    config: ProvisionerConfig,
    state: watch::Sender<ProvisionerState>,
    status_checked: AtomicBool,
    capture_lock: Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialProvisioner {
    pub fn new(host: HostClient, config: ProvisionerConfig) -> Self {
        let watcher = Arc::new(CaptureWatcher::new(host.clone()));
        let (state, _) = watch::channel(ProvisionerState::default());
        Self {
            inner: Arc::new(Inner {
                host,
                watcher,
                config,
                state,
                status_checked: AtomicBool::new(false),
                capture_lock: Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ProvisionerState {
        self.inner.state.borrow().clone()
    }

    pub fn stage(&self) -> AuthStage {
        self.inner.stage()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProvisionerState> {
        self.inner.state.subscribe()
    }

    pub fn watcher(&self) -> &CaptureWatcher {
        &self.inner.watcher
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Resolve the startup stage from the secret files the host reports.
    ///
    /// An unreachable host resolves to `NeedsChatKey`. Later calls return the
    /// current stage without querying the host again.
    pub async fn check_initial_status(&self) -> AuthStage {
        if self.inner.status_checked.swap(true, Ordering::SeqCst) {
            warn!("initial status already checked");
            return self.stage();
        }

        let span = info_span!("usecase.credential_provisioner.check_initial_status");
        async {
            let event = match self.inner.host.check_file_exists(files::CHAT_KEY).await {
                Ok(false) => AuthEvent::StatusResolved {
                    has_chat_key: false,
                    has_profile: false,
                },
                Ok(true) => AuthEvent::StatusResolved {
                    has_chat_key: true,
                    has_profile: self.inner.profile_exists().await,
                },
                Err(err) => {
                    warn!(error = %err, "host unreachable during status check");
                    AuthEvent::StatusUnavailable
                }
            };
            self.inner.apply(event)
        }
        .instrument(span)
        .await
    }

    /// Open the chat provider key page and start the capture ritual.
    pub async fn begin_chat_key_setup(&self) -> Result<WatcherStart, ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.begin_chat_key_setup");
        async {
            let stage = self.stage();
            if !stage.accepts_chat_key() {
                return Err(ProvisionError::StageMismatch { stage });
            }

            let started = self
                .inner
                .begin_ritual(ProviderKind::ChatProvider)
                .await?;
            self.inner.open_key_page();
            Ok(started)
        }
        .instrument(span)
        .await
    }

    /// Start the image host capture ritual and present the capture surface.
    ///
    /// No browser is opened.
    pub async fn begin_image_host_key_setup(&self) -> Result<WatcherStart, ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.begin_image_host_key_setup");
        async {
            let stage = self.stage();
            if !stage.is_resolved() {
                return Err(ProvisionError::StageMismatch { stage });
            }

            let started = self
                .inner
                .begin_ritual(ProviderKind::ImageHostProvider)
                .await?;
            if let Err(err) = self.inner.host.open_capture_surface().await {
                warn!(error = %err, "failed to open capture surface");
            }
            Ok(started)
        }
        .instrument(span)
        .await
    }

    /// Abandon `provider`'s capture ritual, stopping the watcher if that
    /// ritual owns it. Returns whether a watcher was stopped.
    ///
    /// The capture listener calls this for the image host when the capture
    /// surface is closed without a capture.
    pub async fn cancel_ritual(&self, provider: ProviderKind) -> Result<bool, ProvisionError> {
        self.inner.cancel_ritual(provider).await
    }

    /// Handle a captured secret. Normally driven by the capture listener.
    ///
    /// Captures that do not match the active ritual are ignored.
    pub async fn on_clipboard_capture(
        &self,
        capture: ClipboardCapture,
    ) -> Result<AuthStage, ProvisionError> {
        self.inner.handle_capture(capture).await
    }

    pub async fn complete_login(&self) -> Result<AuthStage, ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.complete_login");
        async {
            let stage = self.stage();
            if stage != AuthStage::NeedsLogin {
                return Err(ProvisionError::StageMismatch { stage });
            }
            Ok(self.inner.apply(AuthEvent::LoginCompleted))
        }
        .instrument(span)
        .await
    }

    /// Delete the chat provider state on the host.
    ///
    /// Chat session and prefetch state are left alone.
    pub async fn logout(&self) -> Result<AuthStage, ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.logout");
        async {
            if let Err(err) = self.inner.host.logout(ProviderKind::ChatProvider).await {
                return Err(self.inner.persistence_failure(err.host_message()));
            }

            let chat_key_removed = match self.inner.host.check_file_exists(files::CHAT_KEY).await
            {
                Ok(exists) => !exists,
                Err(err) => {
                    warn!(error = %err, "could not confirm chat key removal");
                    true
                }
            };
            self.inner.clear_error();
            Ok(self.inner.apply(AuthEvent::LoggedOut { chat_key_removed }))
        }
        .instrument(span)
        .await
    }

    /// Forget the image host secret. The auth stage is unaffected.
    pub async fn reset_image_host_key(&self) -> Result<(), ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.reset_image_host_key");
        async {
            self.inner
                .host
                .reset_secret(ProviderKind::ImageHostProvider)
                .await
                .map_err(|err| self.inner.persistence_failure(err.host_message()))?;
            info!("image host key removed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stored secret for `provider`, fetched fresh from the host.
    pub async fn secret(&self, provider: ProviderKind) -> Result<String, ProvisionError> {
        self.inner
            .host
            .get_secret(provider)
            .await?
            .ok_or(ProvisionError::CredentialMissing(provider))
    }

    /// Dispose the capture listener and stop any active watcher.
    pub async fn shutdown(&self) {
        let handle = self.inner.listener.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("capture listener disposed");
        }
        if let Err(err) = self.inner.watcher.stop().await {
            warn!(error = %err, "failed to stop capture watcher during shutdown");
        }
    }
}

impl Drop for CredentialProvisioner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.listener.try_lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        if !self.inner.watcher.is_active() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let watcher = Arc::clone(&self.inner.watcher);
                runtime.spawn(async move {
                    if let Err(err) = watcher.stop().await {
                        warn!(error = %err, "failed to stop capture watcher on drop");
                    }
                });
            }
            Err(_) => warn!("capture watcher left active: no runtime to stop it"),
        }
    }
}

impl Inner {
    fn stage(&self) -> AuthStage {
        self.state.borrow().stage
    }

    fn apply(&self, event: AuthEvent) -> AuthStage {
        let mut next = AuthStage::Loading;
        self.state.send_if_modified(|state| {
            let from = state.stage;
            next = AuthStateMachine::transition(from, event);
            if next == from {
                debug!(stage = ?from, ?event, "auth event left stage unchanged");
                return false;
            }
            info!(from = ?from, to = ?next, ?event, "auth stage transition");
            state.stage = next;
            true
        });
        next
    }

    fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    fn persistence_failure(&self, message: String) -> ProvisionError {
        warn!(error = %message, "secret persistence failed");
        self.state.send_modify(|s| s.error = Some(message.clone()));
        ProvisionError::Persistence(message)
    }

    async fn profile_exists(&self) -> bool {
        self.host
            .check_file_exists(files::PROFILE)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "profile check failed; assuming no profile");
                false
            })
    }

    async fn begin_ritual(self: &Arc<Self>, provider: ProviderKind) -> Result<WatcherStart, ProvisionError> {
        self.ensure_capture_listener().await?;
        self.watcher.start(provider).await
    }

    /// Subscribe to captures before any watcher can produce one.
    async fn ensure_capture_listener(self: &Arc<Self>) -> Result<(), ProvisionError> {
        let mut slot = self.listener.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let captures = self.host.subscribe(topics::CLIPBOARD_CAPTURED).await?;
        let closed = self.host.subscribe(topics::CAPTURE_SURFACE_CLOSED).await?;
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(inner.run_capture_listener(captures, closed)));
        debug!("capture listener started");
        Ok(())
    }

    async fn run_capture_listener(
        self: Arc<Self>,
        mut captures: EventSubscription,
        mut closed: EventSubscription,
    ) {
        loop {
            tokio::select! {
                biased;
                payload = captures.recv() => {
                    let Some(payload) = payload else { break };
                    let capture: ClipboardCapture = match serde_json::from_value(payload) {
                        Ok(capture) => capture,
                        Err(err) => {
                            warn!(error = %err, "ignoring malformed capture event");
                            continue;
                        }
                    };
                    // Failures are recorded in state by handle_capture.
                    let _ = self.handle_capture(capture).await;
                }
                event = closed.recv() => {
                    if event.is_none() {
                        break;
                    }
                    if let Err(err) = self.cancel_ritual(ProviderKind::ImageHostProvider).await {
                        warn!(error = %err, "failed to stop watcher after capture surface closed");
                    }
                }
            }
        }
        debug!(topic = captures.topic(), "capture stream ended");
    }

    async fn cancel_ritual(&self, provider: ProviderKind) -> Result<bool, ProvisionError> {
        let span = info_span!("usecase.credential_provisioner.cancel_ritual", %provider);
        async {
            // A capture in flight finishes the ritual itself.
            let _guard = self.capture_lock.lock().await;
            self.watcher.stop_for(provider).await
        }
        .instrument(span)
        .await
    }

    async fn handle_capture(&self, capture: ClipboardCapture) -> Result<AuthStage, ProvisionError> {
        let span = info_span!(
            "usecase.credential_provisioner.on_clipboard_capture",
            provider = %capture.provider
        );
        async {
            // Duplicate deliveries are rejected, not queued.
            let _guard = self
                .capture_lock
                .try_lock()
                .map_err(|_| ProvisionError::Busy)?;

            if self.watcher.active_provider() != Some(capture.provider) {
                debug!("ignoring capture without a matching ritual");
                return Ok(self.stage());
            }

            if let Err(err) = self.watcher.stop().await {
                warn!(error = %err, "failed to stop capture watcher; persisting anyway");
            }

            if capture.provider == ProviderKind::ImageHostProvider {
                if let Err(err) = self.host.close_capture_surface().await {
                    warn!(error = %err, "failed to close capture surface");
                }
            }

            if let Err(err) = self
                .host
                .encrypt_and_store(capture.provider, &capture.secret)
                .await
            {
                return Err(self.persistence_failure(err.host_message()));
            }
            info!(secret_len = capture.secret.len(), "secret stored");
            self.clear_error();

            let stage = match capture.provider {
                ProviderKind::ChatProvider => {
                    let has_profile = self.profile_exists().await;
                    self.apply(AuthEvent::ChatKeyStored { has_profile })
                }
                ProviderKind::ImageHostProvider => self.stage(),
            };
            Ok(stage)
        }
        .instrument(span)
        .await
    }

    fn open_key_page(&self) {
        let host = self.host.clone();
        let url = self.config.chat_key_page_url.clone();
        tokio::spawn(async move {
            if let Err(err) = host.open_external_url(&url).await {
                warn!(error = %err, "failed to open chat key page");
            }
        });
    }
}
