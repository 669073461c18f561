//! Prefetch cache for the reverse image search link.
//!
//! A single slot holds the search URL for the active image. A background
//! prefetch fills it so the user-facing trigger can open the link without
//! waiting on an upload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sp_core::auth::{ClipboardCapture, ProviderKind};
use sp_core::host::topics;
use sp_core::ports::EventSubscription;
use sp_core::{ImageKey, ImagePayload, PrefetchEntry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::LensConfig;
use crate::host::{HostClient, HostError};
use crate::usecases::credentials::{CredentialProvisioner, ProvisionError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LensError {
    #[error("image upload failed: {0}")]
    Upload(String),

    #[error("failed to open search link: {0}")]
    Open(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LensState {
    /// The single cache slot; `None` while no image is active.
    pub entry: Option<PrefetchEntry>,
    /// An image host capture ritual was started by the trigger.
    pub waiting_for_key: bool,
    /// Last failure of a user-triggered search.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    NoImage,
    /// The cached link was opened without any upload.
    OpenedCached,
    /// The image was uploaded, cached and opened.
    Opened,
    /// No image host key; the capture ritual was started.
    WaitingForKey,
    /// A capture ritual started by an earlier trigger is still pending.
    AlreadyWaiting,
    /// Another trigger is still running.
    Busy,
}

/// Owns the [`PrefetchEntry`] slot.
///
/// ## Behavior
/// - Replacing the image discards the slot and starts a best-effort
///   prefetch. Prefetch failures are logged, never surfaced.
/// - At most one upload per image identity runs at a time; the cache is
///   re-checked inside that critical section right before uploading.
/// - Without an image host key the trigger starts the capture ritual and
///   resumes the search once the key is captured.
pub struct PrefetchCache {
    inner: Arc<Inner>,
}

struct Inner {
    host: HostClient,
    provisioner: Arc<CredentialProvisioner>,
    config: LensConfig,
    state: watch::Sender<LensState>,
    image: Mutex<Option<ImagePayload>>,
    uploads: Mutex<HashMap<ImageKey, Arc<tokio::sync::Mutex<()>>>>,
    triggering: AtomicBool,
    key_listener: Mutex<Option<JoinHandle<()>>>,
    prefetch_task: Mutex<Option<JoinHandle<()>>>,
}

impl PrefetchCache {
    pub fn new(host: HostClient, provisioner: Arc<CredentialProvisioner>, config: LensConfig) -> Self {
        let (state, _) = watch::channel(LensState::default());
        Self {
            inner: Arc::new(Inner {
                host,
                provisioner,
                config,
                state,
                image: Mutex::new(None),
                uploads: Mutex::new(HashMap::new()),
                triggering: AtomicBool::new(false),
                key_listener: Mutex::new(None),
                prefetch_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> LensState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LensState> {
        self.inner.state.subscribe()
    }

    pub fn current_image(&self) -> Option<ImagePayload> {
        self.inner.current_image()
    }

    pub fn cached_url(&self) -> Option<String> {
        let key = self.inner.current_image()?.key();
        self.inner.cached_url(&key)
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Make `image` the active image.
    ///
    /// A different image replaces the slot unconditionally and spawns a
    /// background prefetch; the same image is a no-op. Must be called within
    /// a Tokio runtime.
    pub fn set_image(&self, image: Option<ImagePayload>) {
        let key = image.as_ref().map(ImagePayload::key);
        let replaced = self.inner.state.send_if_modified(|s| {
            let current = s.entry.as_ref().map(|entry| &entry.image_key);
            if current == key.as_ref() {
                return false;
            }
            s.entry = key.clone().map(PrefetchEntry::empty);
            s.error = None;
            true
        });
        if !replaced {
            return;
        }

        *lock(&self.inner.image) = image;
        lock(&self.inner.uploads).retain(|k, _| Some(k) == key.as_ref());

        let previous = lock(&self.inner.prefetch_task).take();
        if let Some(previous) = previous {
            previous.abort();
        }
        let Some(key) = key else {
            debug!("active image cleared");
            return;
        };
        info!(image = %key, "active image replaced");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.prefetch().await;
        });
        *lock(&self.inner.prefetch_task) = Some(task);
    }

    /// Best-effort upload for the active image. Returns the cached link if
    /// one exists or could be computed; failures are only logged.
    pub async fn prefetch(&self) -> Option<String> {
        self.inner.prefetch().await
    }

    /// The user-facing search action.
    pub async fn trigger(&self) -> Result<TriggerOutcome, LensError> {
        let span = info_span!("usecase.prefetch_cache.trigger");
        async {
            if self.inner.triggering.swap(true, Ordering::SeqCst) {
                debug!("trigger already running");
                return Ok(TriggerOutcome::Busy);
            }
            let _running = ResetOnDrop(&self.inner.triggering);

            let result = self.inner.trigger().await;
            if let Err(err) = &result {
                warn!(error = %err, "search trigger failed");
                self.inner.record_error(err);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Dispose the key listener and any running prefetch.
    pub async fn shutdown(&self) {
        let listener = lock(&self.inner.key_listener).take();
        if let Some(listener) = listener {
            listener.abort();
            let _ = listener.await;
        }
        let prefetch = lock(&self.inner.prefetch_task).take();
        if let Some(prefetch) = prefetch {
            prefetch.abort();
            let _ = prefetch.await;
        }
        self.inner.set_waiting(false);
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        for slot in [&self.inner.key_listener, &self.inner.prefetch_task] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
    }
}

struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn current_image(&self) -> Option<ImagePayload> {
        lock(&self.image).clone()
    }

    fn cached_url(&self, key: &ImageKey) -> Option<String> {
        self.state
            .borrow()
            .entry
            .as_ref()
            .and_then(|entry| entry.url_for(key))
            .map(str::to_string)
    }

    fn set_waiting(&self, waiting: bool) {
        self.state.send_if_modified(|s| {
            if s.waiting_for_key == waiting {
                return false;
            }
            s.waiting_for_key = waiting;
            true
        });
    }

    fn record_error(&self, err: &LensError) {
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
    }

    fn upload_gate(&self, key: &ImageKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.uploads).entry(key.clone()).or_default())
    }

    async fn prefetch(&self) -> Option<String> {
        let image = self.current_image()?;
        let key = image.key();
        let span = info_span!("usecase.prefetch_cache.prefetch", image = %key);
        async {
            if let Some(url) = self.cached_url(&key) {
                return Some(url);
            }

            let secret = match self.provisioner.secret(ProviderKind::ImageHostProvider).await {
                Ok(secret) => secret,
                Err(ProvisionError::CredentialMissing(_)) => {
                    debug!("no image host key; skipping prefetch");
                    return None;
                }
                Err(err) => {
                    warn!(error = %err, "could not read image host key for prefetch");
                    return None;
                }
            };

            match self.upload(&image, &secret).await {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(error = %err, "prefetch failed");
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Upload `image` and cache its search link.
    ///
    /// Single writer per image identity: a caller that waited on the gate
    /// returns the link the previous writer cached instead of uploading.
    async fn upload(&self, image: &ImagePayload, secret: &str) -> Result<String, LensError> {
        let key = image.key();
        let gate = self.upload_gate(&key);
        let _writer = gate.lock().await;

        if let Some(url) = self.cached_url(&key) {
            debug!(image = %key, "link cached by a concurrent upload; skipping");
            return Ok(url);
        }

        let public_url = self
            .host
            .upload_image(image, secret)
            .await
            .map_err(|err| LensError::Upload(err.host_message()))?;
        let url = self.config.search_url_for(&public_url);

        let stored = self.state.send_if_modified(|s| match s.entry.as_mut() {
            Some(entry) if entry.image_key == key => {
                entry.url = Some(url.clone());
                true
            }
            _ => false,
        });
        if stored {
            info!(image = %key, "search link cached");
        } else {
            debug!(image = %key, "image replaced during upload; link not cached");
        }
        Ok(url)
    }

    async fn open(&self, url: &str) -> Result<(), LensError> {
        self.host
            .open_external_url(url)
            .await
            .map_err(|err| LensError::Open(err.host_message()))
    }

    async fn upload_and_open(&self, image: &ImagePayload, secret: &str) -> Result<(), LensError> {
        let url = self.upload(image, secret).await?;
        self.open(&url).await
    }

    async fn trigger(self: &Arc<Self>) -> Result<TriggerOutcome, LensError> {
        let Some(image) = self.current_image() else {
            return Ok(TriggerOutcome::NoImage);
        };
        let waiting = self.state.borrow().waiting_for_key;
        if waiting {
            return Ok(TriggerOutcome::AlreadyWaiting);
        }

        let key = image.key();
        if let Some(url) = self.cached_url(&key) {
            self.open(&url).await?;
            return Ok(TriggerOutcome::OpenedCached);
        }

        match self.provisioner.secret(ProviderKind::ImageHostProvider).await {
            Ok(secret) => {
                self.upload_and_open(&image, &secret).await?;
                Ok(TriggerOutcome::Opened)
            }
            Err(ProvisionError::CredentialMissing(_)) => self.wait_for_key().await,
            Err(err) => Err(err.into()),
        }
    }

    async fn wait_for_key(self: &Arc<Self>) -> Result<TriggerOutcome, LensError> {
        let entered = self.state.send_if_modified(|s| {
            if s.waiting_for_key {
                return false;
            }
            s.waiting_for_key = true;
            s.error = None;
            true
        });
        if !entered {
            return Ok(TriggerOutcome::AlreadyWaiting);
        }

        // Listen before the ritual can produce a capture.
        let subscriptions = async {
            let captures = self.host.subscribe(topics::CLIPBOARD_CAPTURED).await?;
            let closed = self.host.subscribe(topics::CAPTURE_SURFACE_CLOSED).await?;
            Ok::<_, HostError>((captures, closed))
        }
        .await;
        let (captures, closed) = match subscriptions {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                self.set_waiting(false);
                return Err(err.into());
            }
        };
        let listener = tokio::spawn(Arc::clone(self).run_key_listener(captures, closed));
        if let Some(previous) = lock(&self.key_listener).replace(listener) {
            previous.abort();
        }

        if let Err(err) = self.provisioner.begin_image_host_key_setup().await {
            if let Some(listener) = lock(&self.key_listener).take() {
                listener.abort();
            }
            self.set_waiting(false);
            return Err(err.into());
        }
        info!("waiting for image host key");
        Ok(TriggerOutcome::WaitingForKey)
    }

    async fn run_key_listener(
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
                    if capture.provider != ProviderKind::ImageHostProvider {
                        continue;
                    }
                    self.set_waiting(false);
                    info!("image host key captured; resuming search");
                    if let Err(err) = self.resume_with_key(&capture.secret).await {
                        warn!(error = %err, "search after key capture failed");
                        self.record_error(&err);
                    }
                    break;
                }
                payload = closed.recv() => {
                    if payload.is_some() {
                        debug!("capture surface closed without a key");
                    }
                    self.set_waiting(false);
                    break;
                }
            }
        }
        captures.unsubscribe();
        closed.unsubscribe();
    }

    async fn resume_with_key(&self, secret: &str) -> Result<(), LensError> {
        let Some(image) = self.current_image() else {
            return Ok(());
        };
        match self.cached_url(&image.key()) {
            Some(url) => self.open(&url).await,
            None => self.upload_and_open(&image, secret).await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
