use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use sp_app::usecases::credentials::WatcherStart;
use sp_app::{CoreServices, SendOutcome, SessionOutcome, TriggerOutcome};
use sp_core::host::{commands, files, topics};
use sp_core::ports::{BridgeError, ClockPort};
use sp_core::{AppConfig, AuthStage, ProviderKind};
use sp_infra::LoopbackBridge;

const PUBLIC_URL: &str = "https://i.ibb.co/x/shot.png";

struct FixedClock;

impl ClockPort for FixedClock {
    fn now_ms(&self) -> i64 {
        1_700_000_000_000
    }
}

/// Host double backed by an in-memory file store.
struct FakeHost {
    bridge: LoopbackBridge,
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeHost {
    fn new(present: &[&str]) -> Self {
        let bridge = LoopbackBridge::new();
        let files: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(
            present
                .iter()
                .map(|name| (name.to_string(), "stored-key".to_string()))
                .collect(),
        ));

        let store = files.clone();
        bridge.on_command(commands::CHECK_FILE_EXISTS, move |args| {
            let exists = args["filename"]
                .as_str()
                .is_some_and(|name| store.lock().unwrap().contains_key(name));
            async move { Ok(json!(exists)) }
        });

        let store = files.clone();
        bridge.on_command(commands::GET_API_KEY, move |args| {
            let secret = secret_file(&args)
                .and_then(|name| store.lock().unwrap().get(name).cloned())
                .unwrap_or_default();
            async move { Ok(json!(secret)) }
        });

        let store = files.clone();
        bridge.on_command(commands::ENCRYPT_AND_SAVE, move |args| {
            if let Some(name) = secret_file(&args) {
                let plaintext = args["plaintext"].as_str().unwrap_or_default().to_string();
                store.lock().unwrap().insert(name.to_string(), plaintext);
            }
            async move { Ok(Value::Null) }
        });

        for command in [commands::RESET_API_KEY, commands::LOGOUT] {
            let store = files.clone();
            bridge.on_command(command, move |args| {
                if let Some(name) = secret_file(&args) {
                    store.lock().unwrap().remove(name);
                }
                async move { Ok(Value::Null) }
            });
        }

        for command in [
            commands::START_CLIPBOARD_WATCHER,
            commands::STOP_CLIPBOARD_WATCHER,
            commands::OPEN_EXTERNAL_URL,
            commands::OPEN_CAPTURE_SURFACE,
            commands::CLOSE_CAPTURE_SURFACE,
        ] {
            bridge.reply_with(command, Value::Null);
        }
        bridge.reply_with(commands::GET_SESSION_PATH, json!("/tmp/shot.png"));
        bridge.reply_with(
            commands::READ_IMAGE_FILE,
            json!({ "base64": "aGVsbG8=", "mimeType": "image/png" }),
        );
        bridge.reply_with(commands::UPLOAD_IMAGE, json!(PUBLIC_URL));

        Self { bridge, files }
    }

    fn has_file(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    fn services(&self) -> CoreServices {
        CoreServices::new(
            Arc::new(self.bridge.clone()),
            Arc::new(FixedClock),
            &AppConfig::empty(),
        )
    }

    fn capture(&self, provider: &str, secret: &str) {
        self.bridge.emit(
            topics::CLIPBOARD_CAPTURED,
            json!({ "provider": provider, "secret": secret }),
        );
    }

    /// Chat streams fail with `failures` in order, then succeed with one token.
    fn stream_with_failures(&self, failures: &'static [&'static str]) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let emitter = self.bridge.emitter();
        self.bridge
            .on_command(commands::START_CHAT_STREAM, move |args| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                let emitter = emitter.clone();
                async move {
                    if let Some(message) = failures.get(attempt) {
                        return Err(BridgeError::Command {
                            command: commands::START_CHAT_STREAM.to_string(),
                            message: message.to_string(),
                        });
                    }
                    emitter.emit(
                        topics::CHAT_STREAM_TOKEN,
                        json!({ "streamId": args["streamId"], "token": "A cat." }),
                    );
                    Ok(Value::Null)
                }
            });
        calls
    }
}

fn secret_file(args: &Value) -> Option<&'static str> {
    args["provider"]
        .as_str()
        .and_then(ProviderKind::from_id)
        .map(|provider| provider.secret_file_name())
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn fresh_install_reaches_authenticated() {
    let host = FakeHost::new(&[]);
    let services = host.services();

    assert_eq!(services.start().await, AuthStage::NeedsChatKey);

    assert_eq!(
        services.provisioner.begin_chat_key_setup().await.unwrap(),
        WatcherStart::Started
    );
    wait_until(|| host.bridge.call_count(commands::OPEN_EXTERNAL_URL) == 1).await;
    assert_eq!(
        host.bridge.calls_to(commands::OPEN_EXTERNAL_URL)[0]["url"],
        "https://aistudio.google.com/app/apikey"
    );

    host.capture("gemini", "chat-secret");
    wait_until(|| services.provisioner.stage() == AuthStage::NeedsLogin).await;

    assert!(!services.provisioner.watcher().is_active());
    assert!(host.has_file(files::CHAT_KEY));
    assert_eq!(
        services.provisioner.complete_login().await.unwrap(),
        AuthStage::Authenticated
    );

    services.shutdown().await;
}

#[tokio::test]
async fn lens_waits_for_image_host_key_then_uploads_once() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    let services = host.services();
    assert_eq!(services.start().await, AuthStage::Authenticated);
    wait_until(|| services.lens.state().entry.is_some()).await;

    assert_eq!(
        services.lens.trigger().await.unwrap(),
        TriggerOutcome::WaitingForKey
    );
    assert_eq!(
        services.lens.trigger().await.unwrap(),
        TriggerOutcome::AlreadyWaiting
    );
    assert!(services.lens.state().waiting_for_key);
    assert_eq!(host.bridge.call_count(commands::START_CLIPBOARD_WATCHER), 1);

    host.capture("imgbb", "imgbb-secret");
    wait_until(|| host.bridge.call_count(commands::OPEN_EXTERNAL_URL) == 1).await;
    wait_until(|| host.has_file(files::IMAGE_HOST_KEY)).await;

    assert!(!services.lens.state().waiting_for_key);
    assert_eq!(host.bridge.call_count(commands::UPLOAD_IMAGE), 1);
    assert_eq!(
        host.bridge.calls_to(commands::UPLOAD_IMAGE)[0]["apiKey"],
        "imgbb-secret"
    );
    assert!(host.bridge.calls_to(commands::OPEN_EXTERNAL_URL)[0]["url"]
        .as_str()
        .unwrap()
        .starts_with("https://lens.google.com/uploadbyurl?url="));

    // Second trigger uses the cached link.
    assert_eq!(
        services.lens.trigger().await.unwrap(),
        TriggerOutcome::OpenedCached
    );
    assert_eq!(host.bridge.call_count(commands::UPLOAD_IMAGE), 1);

    services.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_rolls_back_and_retry_does_not_duplicate() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    host.stream_with_failures(&[]);
    host.bridge.fail_with(commands::SEND_CHAT_TURN, "network down");
    let services = host.services();
    services.start().await;
    assert_eq!(services.start_chat(None).await, SessionOutcome::Completed);

    assert_eq!(services.chat.handle_send("hi").await, SendOutcome::RolledBack);

    let state = services.chat.state();
    assert!(state.messages.iter().all(|m| m.text != "hi"));
    assert_eq!(
        state.last_unconfirmed_message.map(|m| m.text),
        Some("hi".to_string())
    );

    host.bridge.reply_with(commands::SEND_CHAT_TURN, json!("hello"));
    assert_eq!(services.chat.handle_retry_send().await, SendOutcome::Delivered);

    let texts: Vec<String> = services
        .chat
        .state()
        .messages
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts.iter().filter(|t| *t == "hi").count(), 1);
    assert_eq!(texts.last().map(String::as_str), Some("hello"));

    services.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_downgrades_model_once() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    let attempts = host.stream_with_failures(&["429 Too Many Requests"]);
    let services = host.services();
    services.start().await;

    assert_eq!(
        services.start_chat(Some("what is this?")).await,
        SessionOutcome::CompletedOnFallback
    );

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(services.chat.active_model(), "gemini-flash-lite-latest");
    let models: Vec<Value> = host
        .bridge
        .calls_to(commands::START_CHAT_STREAM)
        .into_iter()
        .map(|args| args["model"].clone())
        .collect();
    assert_eq!(
        models,
        vec![json!("gemini-2.5-flash"), json!("gemini-flash-lite-latest")]
    );
    assert_eq!(services.chat.state().streaming_text, "A cat.");
}

#[tokio::test(start_paused = true)]
async fn second_transient_failure_surfaces_error() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    let attempts = host.stream_with_failures(&["503 unavailable", "503 unavailable"]);
    let services = host.services();
    services.start().await;

    assert_eq!(services.start_chat(None).await, SessionOutcome::Failed);

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        services.chat.state().error.as_deref(),
        Some("Service temporarily unavailable.")
    );
}

#[tokio::test]
async fn watcher_start_and_stop_are_idempotent() {
    let host = FakeHost::new(&[]);
    let services = host.services();
    services.start().await;

    assert_eq!(
        services.provisioner.begin_chat_key_setup().await.unwrap(),
        WatcherStart::Started
    );
    assert_eq!(
        services.provisioner.begin_chat_key_setup().await.unwrap(),
        WatcherStart::AlreadyActive
    );
    assert_eq!(host.bridge.call_count(commands::START_CLIPBOARD_WATCHER), 1);

    let watcher = services.provisioner.watcher();
    assert!(watcher.stop().await.unwrap());
    assert!(!watcher.stop().await.unwrap());
    assert_eq!(host.bridge.call_count(commands::STOP_CLIPBOARD_WATCHER), 1);
}

#[tokio::test]
async fn logout_returns_to_chat_key_setup() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    let services = host.services();
    assert_eq!(services.start().await, AuthStage::Authenticated);

    assert_eq!(
        services.provisioner.logout().await.unwrap(),
        AuthStage::NeedsChatKey
    );
    assert!(!host.has_file(files::CHAT_KEY));
}

#[tokio::test]
async fn closing_capture_surface_frees_the_watcher_for_chat_setup() {
    let host = FakeHost::new(&[files::CHAT_KEY, files::PROFILE]);
    let services = host.services();
    assert_eq!(services.start().await, AuthStage::Authenticated);
    wait_until(|| services.lens.state().entry.is_some()).await;

    assert_eq!(
        services.lens.trigger().await.unwrap(),
        TriggerOutcome::WaitingForKey
    );
    host.bridge.emit(topics::CAPTURE_SURFACE_CLOSED, Value::Null);
    wait_until(|| !services.provisioner.watcher().is_active()).await;
    wait_until(|| !services.lens.state().waiting_for_key).await;
    assert_eq!(host.bridge.call_count(commands::STOP_CLIPBOARD_WATCHER), 1);

    assert_eq!(
        services.provisioner.logout().await.unwrap(),
        AuthStage::NeedsChatKey
    );
    assert_eq!(
        services.provisioner.begin_chat_key_setup().await.unwrap(),
        WatcherStart::Started
    );
    host.capture("gemini", "chat-secret");
    // The profile survives logout.
    wait_until(|| services.provisioner.stage() == AuthStage::Authenticated).await;

    assert!(!host.has_file(files::IMAGE_HOST_KEY));
    assert_eq!(host.bridge.call_count(commands::STOP_CLIPBOARD_WATCHER), 2);

    services.shutdown().await;
}
