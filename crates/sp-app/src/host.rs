//! Typed client over the host command/event bridge.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sp_core::auth::ProviderKind;
use sp_core::host::{commands, ImageFile};
use sp_core::ports::{BridgeError, EventBridgePort, EventSubscription};
use sp_core::ImagePayload;
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("{command} returned an unexpected reply: {message}")]
    Decode {
        command: &'static str,
        message: String,
    },
}

impl HostError {
    /// The message the host reported, for user-facing error strings.
    pub fn host_message(&self) -> String {
        match self {
            HostError::Bridge(err) => err.host_message().to_string(),
            HostError::Decode { message, .. } => message.clone(),
        }
    }
}

/// Host commands with typed arguments and replies.
///
/// Secrets are passed through as arguments and never logged.
#[derive(Clone)]
pub struct HostClient {
    bridge: Arc<dyn EventBridgePort>,
}

impl HostClient {
    pub fn new(bridge: Arc<dyn EventBridgePort>) -> Self {
        Self { bridge }
    }

    pub async fn check_file_exists(&self, filename: &str) -> Result<bool, HostError> {
        self.call(commands::CHECK_FILE_EXISTS, json!({ "filename": filename }))
            .await
    }

    /// Stored secret for `provider`; an empty reply means none is stored.
    pub async fn get_secret(&self, provider: ProviderKind) -> Result<Option<String>, HostError> {
        let secret: Option<String> = self
            .call(commands::GET_API_KEY, json!({ "provider": provider.id() }))
            .await?;
        Ok(secret.filter(|s| !s.trim().is_empty()))
    }

    pub async fn encrypt_and_store(
        &self,
        provider: ProviderKind,
        plaintext: &str,
    ) -> Result<(), HostError> {
        self.ack(
            commands::ENCRYPT_AND_SAVE,
            json!({ "plaintext": plaintext, "provider": provider.id() }),
        )
        .await
    }

    pub async fn reset_secret(&self, provider: ProviderKind) -> Result<(), HostError> {
        self.ack(commands::RESET_API_KEY, json!({ "provider": provider.id() }))
            .await
    }

    pub async fn logout(&self, provider: ProviderKind) -> Result<(), HostError> {
        self.ack(commands::LOGOUT, json!({ "provider": provider.id() }))
            .await
    }

    pub async fn start_clipboard_watcher(&self) -> Result<(), HostError> {
        self.ack(commands::START_CLIPBOARD_WATCHER, json!({})).await
    }

    pub async fn stop_clipboard_watcher(&self) -> Result<(), HostError> {
        self.ack(commands::STOP_CLIPBOARD_WATCHER, json!({})).await
    }

    pub async fn open_external_url(&self, url: &str) -> Result<(), HostError> {
        self.ack(commands::OPEN_EXTERNAL_URL, json!({ "url": url }))
            .await
    }

    pub async fn open_capture_surface(&self) -> Result<(), HostError> {
        self.ack(commands::OPEN_CAPTURE_SURFACE, json!({})).await
    }

    pub async fn close_capture_surface(&self) -> Result<(), HostError> {
        self.ack(commands::CLOSE_CAPTURE_SURFACE, json!({})).await
    }

    /// Upload `image` to the image host; returns its public URL.
    pub async fn upload_image(&self, image: &ImagePayload, secret: &str) -> Result<String, HostError> {
        self.call(
            commands::UPLOAD_IMAGE,
            json!({ "image": image, "apiKey": secret }),
        )
        .await
    }

    /// Run one streaming call. Resolves with the terminal result; tokens are
    /// delivered as events tagged with `stream_id`.
    pub async fn start_chat_stream(
        &self,
        stream_id: &str,
        model: &str,
        image: &ImagePayload,
        prompt: &str,
        secret: &str,
    ) -> Result<(), HostError> {
        self.ack(
            commands::START_CHAT_STREAM,
            json!({
                "streamId": stream_id,
                "model": model,
                "image": image,
                "prompt": prompt,
                "apiKey": secret,
            }),
        )
        .await
    }

    pub async fn send_turn(&self, message: &str) -> Result<String, HostError> {
        self.call(commands::SEND_CHAT_TURN, json!({ "message": message }))
            .await
    }

    pub async fn get_session_path(&self) -> Result<Option<String>, HostError> {
        let path: Option<String> = self.call(commands::GET_SESSION_PATH, json!({})).await?;
        Ok(path.filter(|p| !p.is_empty()))
    }

    pub async fn read_image_file(&self, path: &str) -> Result<ImageFile, HostError> {
        self.call(commands::READ_IMAGE_FILE, json!({ "path": path }))
            .await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<EventSubscription, HostError> {
        Ok(self.bridge.subscribe(topic).await?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        command: &'static str,
        args: Value,
    ) -> Result<T, HostError> {
        debug!(command, "invoking host command");
        let reply = self.bridge.invoke(command, args).await?;
        serde_json::from_value(reply).map_err(|err| HostError::Decode {
            command,
            message: err.to_string(),
        })
    }

    async fn ack(&self, command: &'static str, args: Value) -> Result<(), HostError> {
        debug!(command, "invoking host command");
        self.bridge.invoke(command, args).await?;
        Ok(())
    }
}
