//! The image the session is about.
//!
//! Loaded from the host at startup and replaced whenever the host announces
//! a new capture path.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use sp_core::host::topics;
use sp_core::ports::EventSubscription;
use sp_core::image::ImageError;
use sp_core::ImagePayload;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::host::{HostClient, HostError};

pub struct ActiveImageSource {
    host: HostClient,
    image: Arc<watch::Sender<Option<ImagePayload>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveImageSource {
    pub fn new(host: HostClient) -> Self {
        let (image, _) = watch::channel(None);
        Self {
            host,
            image: Arc::new(image),
            listener: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<ImagePayload> {
        self.image.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ImagePayload>> {
        self.image.subscribe()
    }

    /// Load the image the host was started with, if any.
    pub async fn load_startup_image(&self) -> Result<Option<ImagePayload>, HostError> {
        let span = info_span!("usecase.image_source.load_startup_image");
        async {
            let Some(path) = self.host.get_session_path().await? else {
                debug!("no startup image");
                return Ok(None);
            };
            let image = load(&self.host, &path).await?;
            publish(&self.image, image.clone());
            Ok(Some(image))
        }
        .instrument(span)
        .await
    }

    /// Make raw encoded bytes (a paste or drop) the active image.
    ///
    /// The MIME type is sniffed from the bytes. Re-submitting the current
    /// image does not notify subscribers.
    pub fn load_image_bytes(&self, bytes: &[u8]) -> Result<ImagePayload, ImageError> {
        let image = ImagePayload::from_bytes(bytes)?;
        info!(image = %image.key(), mime_type = %image.mime_type, "image received as bytes");
        publish(&self.image, image.clone());
        Ok(image)
    }

    /// Follow `image-path` events until [`Self::shutdown`].
    pub async fn follow_image_events(&self) -> Result<(), HostError> {
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.abort();
        }

        let paths = self.host.subscribe(topics::IMAGE_PATH).await?;
        let task = tokio::spawn(run_path_listener(
            self.host.clone(),
            Arc::clone(&self.image),
            paths,
        ));
        *self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        Ok(())
    }

    pub async fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
            let _ = listener.await;
        }
    }
}

impl Drop for ActiveImageSource {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

async fn load(host: &HostClient, path: &str) -> Result<ImagePayload, HostError> {
    let image = ImagePayload::from(host.read_image_file(path).await?);
    info!(image = %image.key(), mime_type = %image.mime_type, "image loaded");
    Ok(image)
}

fn publish(sender: &watch::Sender<Option<ImagePayload>>, image: ImagePayload) {
    sender.send_if_modified(|current| {
        if current.as_ref().map(ImagePayload::key) == Some(image.key()) {
            return false;
        }
        *current = Some(image);
        true
    });
}

async fn run_path_listener(
    host: HostClient,
    image: Arc<watch::Sender<Option<ImagePayload>>>,
    mut paths: EventSubscription,
) {
    while let Some(payload) = paths.recv().await {
        let Value::String(path) = payload else {
            warn!("ignoring image-path event without a path");
            continue;
        };
        match load(&host, &path).await {
            Ok(loaded) => publish(&image, loaded),
            Err(err) => warn!(error = %err, "failed to load announced image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sp_core::host::commands;
    use sp_infra::LoopbackBridge;
    use std::time::Duration;

    fn bridge() -> LoopbackBridge {
        let bridge = LoopbackBridge::new();
        bridge.on_command(commands::READ_IMAGE_FILE, |args| async move {
            let data = match args["path"].as_str() {
                Some("/tmp/first.png") => "Zmlyc3Q=",
                _ => "c2Vjb25k",
            };
            Ok(json!({ "base64": data, "mimeType": "image/png" }))
        });
        bridge
    }

    fn source(bridge: &LoopbackBridge) -> ActiveImageSource {
        ActiveImageSource::new(HostClient::new(Arc::new(bridge.clone())))
    }

    #[tokio::test]
    async fn startup_image_is_published() {
        let bridge = bridge();
        bridge.reply_with(commands::GET_SESSION_PATH, json!("/tmp/first.png"));
        let source = source(&bridge);

        let image = source.load_startup_image().await.unwrap().unwrap();

        assert_eq!(image.base64, "Zmlyc3Q=");
        assert_eq!(source.current(), Some(image));
    }

    #[tokio::test]
    async fn no_session_path_means_no_image() {
        let bridge = bridge();
        bridge.reply_with(commands::GET_SESSION_PATH, Value::Null);
        let source = source(&bridge);

        assert_eq!(source.load_startup_image().await.unwrap(), None);
        assert_eq!(bridge.call_count(commands::READ_IMAGE_FILE), 0);
    }

    #[tokio::test]
    async fn raw_bytes_become_the_active_image() {
        let bridge = bridge();
        let source = source(&bridge);
        let mut images = source.subscribe();
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

        let image = source.load_image_bytes(&png).unwrap();

        assert_eq!(image.mime_type, "image/png");
        assert_eq!(source.current(), Some(image));
        assert!(images.has_changed().unwrap());
        images.borrow_and_update();

        source.load_image_bytes(&png).unwrap();
        assert!(!images.has_changed().unwrap());
        assert_eq!(bridge.call_count(commands::READ_IMAGE_FILE), 0);
    }

    #[test]
    fn empty_bytes_leave_the_image_alone() {
        let bridge = bridge();
        let source = source(&bridge);

        assert!(matches!(
            source.load_image_bytes(&[]),
            Err(ImageError::Empty)
        ));
        assert!(source.current().is_none());
    }

    #[tokio::test]
    async fn image_path_events_replace_the_image() {
        let bridge = bridge();
        let source = source(&bridge);
        let mut images = source.subscribe();
        source.follow_image_events().await.unwrap();

        bridge.emit(topics::IMAGE_PATH, json!("/tmp/second.png"));

        tokio::time::timeout(Duration::from_secs(1), images.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.current().unwrap().base64, "c2Vjb25k");

        source.shutdown().await;
        assert_eq!(bridge.subscriber_count(topics::IMAGE_PATH), 0);
    }
}
