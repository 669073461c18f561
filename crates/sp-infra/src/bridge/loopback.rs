//! In-process event bridge.
//!
//! Commands are answered by registered async handlers; events are fanned out
//! to every live subscription of a topic. Used to embed the session core
//! without a host process and to script the host in tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sp_core::ports::{BridgeError, EventBridgePort, EventSubscription};
use tokio::sync::mpsc;
use tracing::debug;

type CommandHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BridgeError>> + Send + Sync>;

/// A command call as the bridge received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub command: String,
    pub args: Value,
}

#[derive(Default)]
struct Topics {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>>,
}

impl Topics {
    fn add(&self, topic: &str) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut listeners = self.lock();
        if let Some(entries) = listeners.get_mut(topic) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                listeners.remove(topic);
            }
        }
    }

    fn emit(&self, topic: &str, payload: Value) -> usize {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(topic) else {
            return 0;
        };
        entries.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in entries.iter() {
            let _ = tx.send(payload.clone());
        }
        entries.len()
    }

    fn count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    // A poisoned map is still structurally valid.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle that publishes events into a [`LoopbackBridge`].
///
/// Handlers capture one of these to emit events while a command runs.
#[derive(Clone)]
pub struct LoopbackEmitter {
    topics: Arc<Topics>,
}

impl LoopbackEmitter {
    /// Deliver `payload` to every live subscriber of `topic`. Returns how many
    /// subscribers received it.
    pub fn emit(&self, topic: &str, payload: Value) -> usize {
        let delivered = self.topics.emit(topic, payload);
        debug!(topic, delivered, "loopback event emitted");
        delivered
    }
}

#[derive(Clone, Default)]
pub struct LoopbackBridge {
    handlers: Arc<Mutex<HashMap<String, CommandHandler>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    topics: Arc<Topics>,
}

impl LoopbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `command`.
    pub fn on_command<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BridgeError>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |args| handler(args).boxed());
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(command.to_string(), handler);
    }

    /// Answer `command` with a fixed value.
    pub fn reply_with(&self, command: &str, value: Value) {
        self.on_command(command, move |_| {
            let value = value.clone();
            async move { Ok(value) }
        });
    }

    /// Fail `command` with a fixed host message.
    pub fn fail_with(&self, command: &str, message: &str) {
        let command_name = command.to_string();
        let message = message.to_string();
        self.on_command(command, move |_| {
            let err = BridgeError::Command {
                command: command_name.clone(),
                message: message.clone(),
            };
            async move { Err(err) }
        });
    }

    pub fn emitter(&self) -> LoopbackEmitter {
        LoopbackEmitter {
            topics: Arc::clone(&self.topics),
        }
    }

    pub fn emit(&self, topic: &str, payload: Value) -> usize {
        self.emitter().emit(topic, payload)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.count(topic)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Arguments of every call to `command`, in call order.
    pub fn calls_to(&self, command: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|call| call.command == command)
            .map(|call| call.args)
            .collect()
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.calls_to(command).len()
    }

    /// Command names in call order.
    pub fn command_log(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.command).collect()
    }
}

#[async_trait]
impl EventBridgePort for LoopbackBridge {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                command: command.to_string(),
                args: args.clone(),
            });

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(command)
            .cloned();

        match handler {
            Some(handler) => handler(args).await,
            None => Err(BridgeError::Command {
                command: command.to_string(),
                message: format!("unknown command: {command}"),
            }),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<EventSubscription, BridgeError> {
        let (id, rx) = self.topics.add(topic);
        let topics = Arc::clone(&self.topics);
        let owned_topic = topic.to_string();
        debug!(topic, id, "loopback subscription added");
        Ok(EventSubscription::new(topic, rx, move || {
            topics.remove(&owned_topic, id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn invoke_runs_registered_handler_and_records_call() {
        let bridge = LoopbackBridge::new();
        bridge.on_command("echo", |args| async move { Ok(args) });

        let reply = bridge.invoke("echo", json!({ "x": 1 })).await.unwrap();

        assert_eq!(reply, json!({ "x": 1 }));
        assert_eq!(bridge.calls_to("echo"), vec![json!({ "x": 1 })]);
    }

    #[tokio::test]
    async fn unknown_command_fails() {
        let bridge = LoopbackBridge::new();

        let err = bridge.invoke("missing", json!(null)).await.unwrap_err();

        assert!(matches!(err, BridgeError::Command { ref command, .. } if command == "missing"));
        assert_eq!(bridge.call_count("missing"), 1);
    }

    #[tokio::test]
    async fn fail_with_reports_host_message() {
        let bridge = LoopbackBridge::new();
        bridge.fail_with("upload_image", "network down");

        let err = bridge.invoke("upload_image", json!({})).await.unwrap_err();

        assert_eq!(err.host_message(), "network down");
    }

    #[tokio::test]
    async fn events_reach_every_live_subscriber() {
        let bridge = LoopbackBridge::new();
        let mut first = bridge.subscribe("topic").await.unwrap();
        let mut second = bridge.subscribe("topic").await.unwrap();

        assert_eq!(bridge.emit("topic", json!("hello")), 2);

        assert_eq!(first.recv().await, Some(json!("hello")));
        assert_eq!(second.recv().await, Some(json!("hello")));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let bridge = LoopbackBridge::new();
        let sub = bridge.subscribe("topic").await.unwrap();
        let other = bridge.subscribe("topic").await.unwrap();
        assert_eq!(bridge.subscriber_count("topic"), 2);

        drop(sub);
        assert_eq!(bridge.subscriber_count("topic"), 1);

        other.unsubscribe();
        assert_eq!(bridge.subscriber_count("topic"), 0);
        assert_eq!(bridge.emit("topic", json!(1)), 0);
    }

    #[tokio::test]
    async fn handlers_can_emit_while_running() {
        let bridge = LoopbackBridge::new();
        let emitter = bridge.emitter();
        bridge.on_command("stream", move |_| {
            let emitter = emitter.clone();
            async move {
                emitter.emit("tokens", json!("a"));
                emitter.emit("tokens", json!("b"));
                Ok(json!(null))
            }
        });
        let mut tokens = bridge.subscribe("tokens").await.unwrap();

        bridge.invoke("stream", json!({})).await.unwrap();

        assert_eq!(tokens.try_recv(), Some(json!("a")));
        assert_eq!(tokens.try_recv(), Some(json!("b")));
        assert_eq!(tokens.try_recv(), None);
    }
}
