use super::{ObjectMeta, ObjectStore as TfObjectStore, Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ObjectStore as UpstreamObjectStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;

/// S3-compatible object store, built directly on `object_store`'s AWS
/// support. Presigned URLs are the crate's own `Signer` implementation,
/// not hand-rolled.
pub struct S3Store {
    inner: Arc<object_store::aws::AmazonS3>,
    bucket: String,
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let Some(key) = access_key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = secret_key {
            builder = builder.with_secret_access_key(secret);
        }

        let inner = builder
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(inner),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl TfObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = StorePath::from(key);
        self.inner
            .put(&path, PutPayload::from_bytes(bytes))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = StorePath::from(key);
        let result = self.inner.get(&path).await.map_err(map_err(key))?;
        result.bytes().await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = StorePath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta> {
        let path = StorePath::from(key);
        let meta = self.inner.head(&path).await.map_err(map_err(key))?;
        Ok(ObjectMeta { size: meta.size as u64 })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let path = StorePath::from(key);
        let url = self
            .inner
            .signed_url(http::Method::GET, &path, ttl)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(url.to_string())
    }
}

fn map_err(key: &str) -> impl FnOnce(object_store::Error) -> StoreError + '_ {
    move |e| match e {
        object_store::Error::NotFound { .. } => StoreError::NotFound(key.to_string()),
        e => StoreError::Backend(e.to_string()),
    }
}

impl S3Store {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}
