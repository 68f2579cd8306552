//! Evidence document storage
//!
//! The DocumentStore trait is the seam between metadata rows and blob
//! bytes. This deployment stores blobs on local disk under the root
//! folder; the trait keeps an object-store backend possible without
//! touching handlers.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use yiba_common::{Error, Result};

/// Blob storage behind the documents API
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store bytes under a key, overwriting any existing blob
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch a blob's bytes
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove a blob; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// SHA-256 of document bytes, hex-encoded (dedup key)
pub fn content_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Build the storage key for a new document
///
/// Keys are institution-prefixed so per-tenant cleanup is a directory
/// removal.
pub fn storage_key(institution_id: Uuid, document_id: Uuid) -> String {
    format!("{}/{}", institution_id, document_id)
}

/// Local-disk document store rooted at `<root>/documents`
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are generated internally as "<uuid>/<uuid>"; reject anything else
        let mut parts = key.split('/');
        let (dir, file) = match (parts.next(), parts.next(), parts.next()) {
            (Some(dir), Some(file), None) => (dir, file),
            _ => return Err(Error::InvalidInput(format!("Malformed storage key: {}", key))),
        };
        if Uuid::parse_str(dir).is_err() || Uuid::parse_str(file).is_err() {
            return Err(Error::InvalidInput(format!("Malformed storage key: {}", key)));
        }
        Ok(self.root.join(dir).join(file))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp name then rename, so a crashed upload never
        // leaves a half-written blob under the final key
        let tmp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        storage_key(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().to_path_buf());

        let key = test_key();
        store.put(&key, b"evidence bytes").await.unwrap();
        let bytes = store.get(&key).await.unwrap();
        assert_eq!(bytes, b"evidence bytes");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().to_path_buf());

        let err = store.get(&test_key()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().to_path_buf());

        let key = test_key();
        store.put(&key, b"x").await.unwrap();
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().to_path_buf());

        for key in ["../etc/passwd", "a/b/c", "not-a-uuid/also-not"] {
            let err = store.put(key, b"x").await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "key {} accepted", key);
        }
    }

    #[test]
    fn test_sha256_stable() {
        let a = content_sha256(b"same bytes");
        let b = content_sha256(b"same bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_sha256(b"other bytes"));
    }
}
