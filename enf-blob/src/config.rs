/// Limits applied to uploads before they reach the store
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Largest accepted upload
    pub max_blob_bytes: u64,

    /// Lower-case extensions accepted by [`BlobAdapter::put_upload`](crate::BlobAdapter::put_upload)
    pub allowed_extensions: Vec<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_blob_bytes: 100 * 1024 * 1024, // 100MB
            allowed_extensions: vec!["wav".to_string()],
        }
    }
}

impl BlobConfig {
    pub fn with_max_blob_bytes(mut self, max: u64) -> Self {
        self.max_blob_bytes = max;
        self
    }

    /// Case-insensitive extension check on a client filename.
    pub fn accepts(&self, filename: &str) -> bool {
        extension(filename)
            .map(|ext| self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

fn extension(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}
