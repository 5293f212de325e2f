// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Durable object storage seam
//!
//! The gateway persists generation artifacts (captured specs and output
//! archives) through the [`ObjectStore`] trait. Keys are opaque strings
//! chosen by the caller; the store never invents or rewrites them. The
//! shipped implementation is filesystem-backed with HMAC-signed,
//! time-limited retrieval links. Cloud providers plug in behind the
//! same trait.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWriteExt};

pub type StorageResult<T> = Result<T, StorageError>;

type HmacSha256 = Hmac<Sha256>;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable object storage operations the gateway depends on
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a complete object under `key`
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> StorageResult<()>;

    /// Stream an object under `key`, returning the number of bytes written
    async fn put_stream(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
    ) -> StorageResult<u64>;

    /// Produce a time-limited retrieval link for `key`
    async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<String>;
}

/// Filesystem-backed object store
///
/// Objects live under `root` at their key path. Retrieval links embed a
/// unix expiry timestamp and an HMAC-SHA256 signature over
/// `key|expiry`, so links cannot be forged or extended without the
/// signing key.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
    signing_key: Vec<u8>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>, signing_key: impl Into<Vec<u8>>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
        }
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn sign(&self, key: &str, expires: u64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC accepts keys of any length");
        mac.update(key.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a retrieval link signature produced by [`presign`](ObjectStore::presign)
    pub fn verify(&self, key: &str, expires: u64, signature: &str) -> bool {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        expires > now && self.sign(key, expires) == signature
    }
}

/// Reject keys that would escape the storage root
fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }
    let path = Path::new(key);
    if path.is_absolute()
        || path.components().any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(key, content_type, size = bytes.len(), "stored object");
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
    ) -> StorageResult<u64> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        tracing::debug!(key, content_type, size = written, "stored object (streamed)");
        Ok(written)
    }

    async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let path = self.object_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + ttl.as_secs();
        let signature = self.sign(key, expires);
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_base_url, key, expires, signature
        ))
    }
}
