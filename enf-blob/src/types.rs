use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Name of an uploaded blob: `{uuid}_{sanitized client filename}`.
///
/// The random prefix makes every upload unique; the suffix keeps the original
/// name visible in logs and in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    /// Fresh id for an upload named `filename` by the client.
    pub fn for_upload(filename: &str) -> Self {
        let prefix = Uuid::new_v4();
        match sanitize_filename(filename) {
            name if name.is_empty() => Self(prefix.to_string()),
            name => Self(format!("{prefix}_{name}")),
        }
    }

    /// Store key: `uploads/{id}`
    pub fn object_key(&self) -> String {
        format!("uploads/{}", self.0)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Reduce a client-supplied filename to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading dots/underscores are trimmed.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Proof of a stored upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobReceipt {
    pub id: BlobId,
    /// Key the store holds the bytes under
    pub key: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub filename: String,
}
