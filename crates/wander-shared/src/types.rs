use serde::{Deserialize, Serialize};

/// Ownership handle for a binary object held by the media gateway.
///
/// The record that embeds a `MediaRef` owns the descriptor; the blob itself
/// lives in the gateway and must be deleted when the last referencing record
/// is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    /// Public URL the client renders.
    pub url: String,
    /// Storage path inside the gateway.  `None` on legacy records that were
    /// written before the path was persisted; resolved from the URL at
    /// deletion time.
    pub storage_path: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            storage_path: Some(storage_path.into()),
        }
    }

    /// A descriptor that only carries a URL (legacy shape).
    pub fn url_only(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            storage_path: None,
        }
    }
}
