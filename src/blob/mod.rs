//! Blob-store collaborator interface.
//!
//! Uploaded audio goes through `BlobStore` and comes back as a URL the
//! transcription backend can fetch. The local implementation writes under a
//! media directory served at a configured public base URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return a fetchable URL.
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String>;
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let relative = path.trim_start_matches('/');
        let target = self.root.join(relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create media directory")?;
        }

        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write blob {:?}", target))?;

        debug!("Stored {} bytes at {:?}", bytes.len(), target);
        Ok(format!("{}/{}", self.public_base_url, relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(
            dir.path().to_path_buf(),
            "http://localhost:3737/media/".to_string(),
        );

        let url = store
            .upload("meetings/m1/audio.wav", b"RIFF")
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:3737/media/meetings/m1/audio.wav");
        let written = std::fs::read(dir.path().join("meetings/m1/audio.wav")).unwrap();
        assert_eq!(written, b"RIFF");
    }
}
