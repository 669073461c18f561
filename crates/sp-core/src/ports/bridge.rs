//! Event bridge port.
//!
//! The two primitives the host exposes: a request/response command call and
//! a subscribe/unsubscribe event stream.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The host ran the command and reported a failure.
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// The host could not be reached at all.
    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("failed to subscribe to {topic}: {message}")]
    Subscribe { topic: String, message: String },
}

impl BridgeError {
    /// Message as the host reported it, without the command prefix.
    pub fn host_message(&self) -> &str {
        match self {
            BridgeError::Command { message, .. } => message,
            BridgeError::Unavailable(message) => message,
            BridgeError::Subscribe { message, .. } => message,
        }
    }
}

/// Port over the host process command/event bridge.
///
/// ## Behavior
/// - `invoke` resolves once the host replies; each call may fail.
/// - `subscribe` returns a scoped subscription; dropping it unsubscribes.
#[async_trait]
pub trait EventBridgePort: Send + Sync {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError>;

    async fn subscribe(&self, topic: &str) -> Result<EventSubscription, BridgeError>;
}

type Disposer = Box<dyn FnOnce() + Send>;

/// A live event subscription.
///
/// The disposer runs exactly once: on [`EventSubscription::unsubscribe`] or
/// when the subscription is dropped, whichever comes first. Every exit path
/// of the owner therefore releases the host-side listener.
pub struct EventSubscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Value>,
    disposer: Option<Disposer>,
}

impl EventSubscription {
    pub fn new(
        topic: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Value>,
        disposer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            rx,
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` once the host side is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Payload already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.dispose();
    }

    fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
        self.rx.close();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("topic", &self.topic)
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

#[cfg(test)]
mockall::mock! {
    pub Bridge {}

    #[async_trait]
    impl EventBridgePort for Bridge {
        async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError>;
        async fn subscribe(&self, topic: &str) -> Result<EventSubscription, BridgeError>;
    }
}
