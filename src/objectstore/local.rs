use super::{ObjectMeta, ObjectStore, Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

type HmacSha256 = Hmac<Sha256>;

/// Filesystem-backed object store. Direct URLs are signed with an
/// HMAC-SHA256 MAC over `(key, expiry)` so they carry the same
/// unforgeability and expiry guarantees as a real S3 presigned URL.
pub struct LocalStore {
    root: PathBuf,
    secret: Vec<u8>,
    /// `scheme://host` this store's direct URLs should point at; the
    /// in-process blob endpoint is expected to be mounted at `/_blobs/*key`.
    base_url: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            secret: secret.into(),
            base_url: base_url.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('\0') {
            return Err(StoreError::Backend(format!("invalid key: {key}")));
        }
        let candidate = self.root.join(key);
        // Reject any key whose components would escape `root`.
        for component in Path::new(key).components() {
            if matches!(component, Component::ParentDir | Component::RootDir) {
                return Err(StoreError::Backend(format!("invalid key: {key}")));
            }
        }
        Ok(candidate)
    }

    fn sign(&self, key: &str, expires: u64) -> String {
        sign(&self.secret, key, expires)
    }
}

/// Compute the HMAC-SHA256 signature for `(key, expires)`, hex-encoded.
pub fn sign(secret: &[u8], key: &str, expires: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(key.as_bytes());
    mac.update(b":");
    mac.update(expires.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a direct-URL signature was produced by [`sign`] and has not
/// expired. Used by the in-process blob endpoint before serving bytes.
pub fn verify(secret: &[u8], key: &str, expires: u64, signature: &str) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if now > expires {
        return false;
    }
    let expected = sign(secret, key, expires);
    expected.as_bytes() == signature.as_bytes()
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_name = format!(
            "{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("upload")
        );
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(ObjectMeta { size: meta.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .as_secs()
            + ttl.as_secs();
        let sig = self.sign(key, expires);
        Ok(format!(
            "{}/_blobs/{}?expires={}&sig={}",
            self.base_url.trim_end_matches('/'),
            key,
            expires,
            sig
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalStore {
        LocalStore::new(dir.path(), b"test-secret".to_vec(), "http://localhost:8080")
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("providers/a/b/c.zip", Bytes::from_static(b"hello")).await.unwrap();
        let bytes = store.get("providers/a/b/c.zip").await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_returns_size() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("k", Bytes::from_static(b"12345")).await.unwrap();
        let meta = store.stat("k").await.unwrap();
        assert_eq!(meta.size, 5);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.put("../escape", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_presigned_url_round_trip_verifies() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = store.presign_get("k", Duration::from_secs(60)).await.unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        let expires: u64 = query["expires"].parse().unwrap();
        let sig = &query["sig"];
        assert!(verify(b"test-secret", "k", expires, sig));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let sig = sign(b"secret", "key", 1_000_000_000_000);
        assert!(!verify(b"secret", "key", 1_000_000_000_000, &format!("{sig}00")));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let sig = sign(b"secret", "key", 0);
        assert!(!verify(b"secret", "key", 0, &sig));
    }
}
