//! Chat session engine.
//!
//! One conversation about one image: the initial streamed answer (the
//! floating preview), follow-up turns, retry and model fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use sp_core::chat::{ChatMessage, ChatSessionState, ProviderFailure, SessionStage};
use sp_core::host::{topics, StreamToken};
use sp_core::ports::ClockPort;
use sp_core::{ImagePayload, ProviderKind};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::optimistic::apply_optimistically;
use super::ChatConfig;
use crate::host::HostClient;

const MISSING_KEY_MESSAGE: &str = "API Key missing. Please reset in settings.";

/// How a session start ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Secret, image or prompt was missing; nothing happened.
    Skipped,
    /// Reload found no chat provider secret; an error was recorded.
    MissingCredential,
    /// Another request was in flight.
    Busy,
    Completed,
    /// Completed on the fallback model after one transient failure.
    CompletedOnFallback,
    Failed,
    /// The stream was abandoned; its result was discarded.
    Abandoned,
}

/// How a follow-up turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Skipped,
    Busy,
    Delivered,
    /// The turn failed and the optimistic user message was removed.
    RolledBack,
}

#[derive(Clone)]
struct SessionInput {
    image: ImagePayload,
    prompt: String,
}

/// Owns [`ChatSessionState`] and the active model.
///
/// ## Behavior
/// - At most one request (initial stream or turn) is in flight; others are
///   rejected as [`SessionOutcome::Busy`] / [`SendOutcome::Busy`].
/// - A transient failure on the first stream attempt switches to the
///   fallback model and retries exactly once.
/// - Secrets are used for one call and never stored.
pub struct ChatSessionEngine {
    host: HostClient,
    clock: Arc<dyn ClockPort>,
    config: ChatConfig,
    state: watch::Sender<ChatSessionState>,
    model: watch::Sender<String>,
    last_input: Mutex<Option<SessionInput>>,
    generation: AtomicU64,
    next_id: AtomicU64,
}

impl ChatSessionEngine {
    pub fn new(host: HostClient, clock: Arc<dyn ClockPort>, config: ChatConfig) -> Self {
        let (state, _) = watch::channel(ChatSessionState::default());
        let (model, _) = watch::channel(config.default_model.clone());
        let next_id = AtomicU64::new(u64::try_from(clock.now_ms()).unwrap_or_default());
        Self {
            host,
            clock,
            config,
            state,
            model,
            last_input: Mutex::new(None),
            generation: AtomicU64::new(0),
            next_id,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn state(&self) -> ChatSessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSessionState> {
        self.state.subscribe()
    }

    pub fn active_model(&self) -> String {
        self.model.borrow().clone()
    }

    pub fn set_model(&self, model: &str) {
        self.model.send_if_modified(|current| {
            if current == model {
                return false;
            }
            *current = model.to_string();
            true
        });
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Start a fresh session: clear history, warm up, then stream the
    /// initial answer into the floating preview.
    ///
    /// Does nothing unless secret, image and prompt are all present.
    pub async fn start_session(
        &self,
        secret: Option<&str>,
        model: &str,
        image: Option<&ImagePayload>,
        prompt: Option<&str>,
    ) -> SessionOutcome {
        let (Some(secret), Some(image), Some(prompt)) = (
            non_blank(secret),
            image.filter(|image| !image.is_empty()),
            non_blank(prompt),
        ) else {
            debug!("session inputs incomplete; not starting");
            return SessionOutcome::Skipped;
        };

        let span = info_span!(
            "usecase.chat_session.start_session",
            model = %model,
            image = %image.key()
        );
        self.run_session(secret, model, image, prompt)
            .instrument(span)
            .await
    }

    /// Restart the last session with a secret fetched fresh from the host.
    pub async fn handle_reload(&self) -> SessionOutcome {
        let span = info_span!("usecase.chat_session.handle_reload");
        async {
            let secret = self
                .host
                .get_secret(ProviderKind::ChatProvider)
                .await
                .unwrap_or_else(|err| {
                    warn!(error = %err, "failed to read chat key");
                    None
                });
            let Some(secret) = secret else {
                self.state
                    .send_modify(|s| s.error = Some(MISSING_KEY_MESSAGE.to_string()));
                return SessionOutcome::MissingCredential;
            };

            let last_input = lock(&self.last_input).clone();
            let Some(input) = last_input else {
                debug!("no previous session to reload");
                return SessionOutcome::Skipped;
            };
            let model = self.active_model();
            self.start_session(
                Some(&secret),
                &model,
                Some(&input.image),
                Some(&input.prompt),
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Stop applying tokens of the current stream. The host call runs to
    /// completion and its result is discarded.
    pub fn abandon_stream(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let released = self.state.send_if_modified(|s| {
            if matches!(s.stage, SessionStage::WarmingUp | SessionStage::Streaming) {
                s.stage = SessionStage::Idle;
                true
            } else {
                false
            }
        });
        if released {
            info!(generation, "chat stream abandoned");
        }
    }

    /// Send a follow-up turn.
    ///
    /// The first turn moves the floating preview into the history. The user
    /// message is appended optimistically and removed again if the turn
    /// fails; it stays available for [`Self::handle_retry_send`].
    pub async fn handle_send(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Skipped;
        }

        let now = self.clock.now();
        let message = ChatMessage::user(self.next_message_id(), text, now);
        let started = self.state.send_if_modified(|s| {
            if s.stage != SessionStage::Idle {
                return false;
            }
            if s.enter_chat_mode(now) {
                debug!(history = s.messages.len(), "entered chat mode");
            }
            s.stage = SessionStage::Sending;
            s.error = None;
            true
        });
        if !started {
            debug!("request in flight; send rejected");
            return SendOutcome::Busy;
        }

        let span = info_span!("usecase.chat_session.handle_send", message_id = %message.id);
        self.submit(message).instrument(span).await
    }

    /// Resubmit the last message whose turn failed.
    pub async fn handle_retry_send(&self) -> SendOutcome {
        let mut pending = None;
        let mut busy = false;
        self.state.send_if_modified(|s| {
            let Some(message) = s.last_unconfirmed_message.clone() else {
                return false;
            };
            if s.stage != SessionStage::Idle {
                busy = true;
                return false;
            }
            s.stage = SessionStage::Sending;
            s.error = None;
            pending = Some(message);
            true
        });

        match pending {
            Some(message) => {
                let span = info_span!(
                    "usecase.chat_session.handle_retry_send",
                    message_id = %message.id
                );
                self.submit(message).instrument(span).await
            }
            None if busy => SendOutcome::Busy,
            None => SendOutcome::Skipped,
        }
    }

    async fn run_session(
        &self,
        secret: &str,
        model: &str,
        image: &ImagePayload,
        prompt: &str,
    ) -> SessionOutcome {
        let started = self.state.send_if_modified(|s| {
            if s.stage != SessionStage::Idle {
                return false;
            }
            s.reset_for_new_session();
            s.stage = SessionStage::WarmingUp;
            s.error = None;
            true
        });
        if !started {
            debug!("request in flight; session start rejected");
            return SessionOutcome::Busy;
        }

        *lock(&self.last_input) = Some(SessionInput {
            image: image.clone(),
            prompt: prompt.to_string(),
        });
        self.set_model(model);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.config.warmup).await;
        if !self.is_current(generation) {
            return SessionOutcome::Abandoned;
        }

        let prompt = self.config.compose_prompt(prompt);
        let outcome = match self
            .stream_once(generation, secret, model, image, &prompt)
            .await
        {
            Ok(()) => SessionOutcome::Completed,
            Err(failure) if failure.is_transient() => {
                if !self.is_current(generation) {
                    return SessionOutcome::Abandoned;
                }
                let fallback = self.config.fallback_model.clone();
                warn!(?failure, fallback = %fallback, "transient provider failure; retrying on fallback model");
                self.set_model(&fallback);
                self.update_if_current(generation, |s| s.streaming_text.clear());

                match self
                    .stream_once(generation, secret, &fallback, image, &prompt)
                    .await
                {
                    Ok(()) => SessionOutcome::CompletedOnFallback,
                    Err(failure) => {
                        self.record_failure(generation, &failure);
                        SessionOutcome::Failed
                    }
                }
            }
            Err(failure) => {
                self.record_failure(generation, &failure);
                SessionOutcome::Failed
            }
        };

        if !self.is_current(generation) {
            return SessionOutcome::Abandoned;
        }
        self.update_if_current(generation, |s| s.stage = SessionStage::Idle);
        info!(?outcome, "chat session finished");
        outcome
    }

    /// One streaming call. Tokens arriving before the terminal reply are
    /// drained before returning.
    async fn stream_once(
        &self,
        generation: u64,
        secret: &str,
        model: &str,
        image: &ImagePayload,
        prompt: &str,
    ) -> Result<(), ProviderFailure> {
        let stream_id = Uuid::new_v4().to_string();
        let mut tokens = self
            .host
            .subscribe(topics::CHAT_STREAM_TOKEN)
            .await
            .map_err(|err| ProviderFailure::classify(&err.host_message()))?;

        let response_id = self.next_message_id();
        self.update_if_current(generation, |s| {
            s.stage = SessionStage::Streaming;
            s.floating_response_id = Some(response_id);
        });
        debug!(%stream_id, model, "chat stream opened");

        let call = self
            .host
            .start_chat_stream(&stream_id, model, image, prompt, secret);
        tokio::pin!(call);

        let result = loop {
            tokio::select! {
                biased;
                Some(payload) = tokens.recv() => self.apply_token(generation, &stream_id, payload),
                result = &mut call => break result,
            }
        };
        while let Some(payload) = tokens.try_recv() {
            self.apply_token(generation, &stream_id, payload);
        }
        tokens.unsubscribe();

        result.map_err(|err| {
            warn!(error = %err, model, "chat stream failed");
            ProviderFailure::classify(&err.host_message())
        })
    }

    fn apply_token(&self, generation: u64, stream_id: &str, payload: Value) {
        let token: StreamToken = match serde_json::from_value(payload) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "ignoring malformed stream token");
                return;
            }
        };
        if token.stream_id != stream_id {
            return;
        }
        self.update_if_current(generation, |s| s.streaming_text.push_str(&token.token));
    }

    async fn submit(&self, message: ChatMessage) -> SendOutcome {
        let message_id = message.id.clone();
        let result = apply_optimistically(
            &self.state,
            |s| {
                s.messages.push(message.clone());
                s.last_unconfirmed_message = Some(message.clone());
            },
            self.host.send_turn(&message.text),
            |s| {
                if s.messages.last().is_some_and(|last| last.id == message_id) {
                    s.messages.pop();
                }
            },
        )
        .await;

        match result {
            Ok(reply) => {
                let reply = ChatMessage::model(self.next_message_id(), reply, self.clock.now());
                self.state.send_modify(|s| {
                    s.messages.push(reply);
                    s.last_unconfirmed_message = None;
                    s.stage = SessionStage::Idle;
                });
                SendOutcome::Delivered
            }
            Err(err) => {
                warn!(error = %err, "chat turn failed; rolled back");
                self.state.send_modify(|s| {
                    s.error = Some(format!("Failed to send message. {}", err.host_message()));
                    s.stage = SessionStage::Idle;
                });
                SendOutcome::RolledBack
            }
        }
    }

    fn record_failure(&self, generation: u64, failure: &ProviderFailure) {
        let message = failure.user_message();
        self.update_if_current(generation, |s| {
            s.error = Some(message);
            s.stage = SessionStage::Idle;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn update_if_current(&self, generation: u64, update: impl FnOnce(&mut ChatSessionState)) {
        self.state.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            update(s);
            true
        });
    }

    fn next_message_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
