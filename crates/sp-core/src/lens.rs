//! Prefetch cache entry for the reverse image search link.

use crate::image::ImageKey;

/// The single live cache slot: an image identity and, once uploaded, the
/// external search URL computed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchEntry {
    pub image_key: ImageKey,
    pub url: Option<String>,
}

impl PrefetchEntry {
    pub fn empty(image_key: ImageKey) -> Self {
        Self {
            image_key,
            url: None,
        }
    }

    /// Cached URL, only if it belongs to `key`.
    pub fn url_for(&self, key: &ImageKey) -> Option<&str> {
        if &self.image_key == key {
            self.url.as_deref()
        } else {
            None
        }
    }
}
