use serde::{Deserialize, Serialize};

use crate::host;

/// External service a secret is provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// The chat model provider.
    #[serde(rename = "gemini")]
    ChatProvider,
    /// The public image host used for reverse image search.
    #[serde(rename = "imgbb")]
    ImageHostProvider,
}

impl ProviderKind {
    /// Provider id understood by the host commands.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::ChatProvider => host::providers::CHAT,
            ProviderKind::ImageHostProvider => host::providers::IMAGE_HOST,
        }
    }

    /// File the host keeps the encrypted secret in.
    pub fn secret_file_name(&self) -> &'static str {
        match self {
            ProviderKind::ChatProvider => host::files::CHAT_KEY,
            ProviderKind::ImageHostProvider => host::files::IMAGE_HOST_KEY,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            host::providers::CHAT => Some(ProviderKind::ChatProvider),
            host::providers::IMAGE_HOST => Some(ProviderKind::ImageHostProvider),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A secret lifted from the clipboard while the capture watcher was active.
///
/// Produced once per successful capture and consumed in the same handling
/// tick. It is never stored in component state, and `Debug` redacts the
/// secret.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ClipboardCapture {
    pub provider: ProviderKind,
    pub secret: String,
}

impl std::fmt::Debug for ClipboardCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardCapture")
            .field("provider", &self.provider)
            .field("secret", &format_args!("<{} bytes>", self.secret.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_round_trip() {
        for kind in [ProviderKind::ChatProvider, ProviderKind::ImageHostProvider] {
            assert_eq!(ProviderKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ProviderKind::from_id("openai"), None);
    }

    #[test]
    fn capture_deserializes_from_host_payload() {
        let capture: ClipboardCapture =
            serde_json::from_value(serde_json::json!({ "provider": "imgbb", "secret": "k-123" }))
                .unwrap();

        assert_eq!(capture.provider, ProviderKind::ImageHostProvider);
        assert_eq!(capture.secret, "k-123");
    }

    #[test]
    fn capture_debug_redacts_secret() {
        let capture = ClipboardCapture {
            provider: ProviderKind::ChatProvider,
            secret: "AIza-very-secret".to_string(),
        };

        let rendered = format!("{:?}", capture);
        assert!(!rendered.contains("AIza"));
        assert!(rendered.contains("16 bytes"));
    }
}
