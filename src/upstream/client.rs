use bytes::Bytes;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::observability::Metrics;

use super::types::{ModulePackage, ModuleVersionsDoc, ProviderPackage, ProviderVersionsDoc};
use super::{Result, UpstreamError};

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub provider_registry_base: String,
    pub module_registry_base: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_download_size: u64,
    pub user_agent: String,
}

/// HTTP client for the upstream registry's discovery and download
/// protocols. Every call is wrapped in bounded retry with exponential
/// backoff and jitter; only transport failures and 5xx responses retry.
pub struct UpstreamClient {
    http: Client,
    config: UpstreamClientConfig,
    metrics: Arc<Metrics>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(config: UpstreamClientConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        Ok(Self { http, config, metrics })
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let result = loop {
            match f().await {
                Ok(value) => break Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    let jitter_ms = rand::thread_rng().gen_range(0..100);
                    warn!(op, attempt, error = %e, "upstream call failed, retrying");
                    tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                }
                Err(e) => break Err(e),
            }
        };
        self.metrics.upstream_request(result.is_ok());
        result
    }

    fn classify_status(status: StatusCode) -> UpstreamError {
        if status == StatusCode::NOT_FOUND {
            UpstreamError::NotFound
        } else {
            UpstreamError::Status(status.as_u16())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))
    }

    pub async fn provider_versions(&self, namespace: &str, kind: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/v1/providers/{namespace}/{kind}/versions",
            self.config.provider_registry_base
        );
        self.with_retry("provider_versions", || async {
            let doc: ProviderVersionsDoc = self.get_json(&url).await?;
            Ok(doc.versions.into_iter().map(|v| v.version).collect())
        })
        .await
    }

    pub async fn provider_package(
        &self,
        namespace: &str,
        kind: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<ProviderPackage> {
        let url = format!(
            "{}/v1/providers/{namespace}/{kind}/{version}/download/{os}/{arch}",
            self.config.provider_registry_base
        );
        self.with_retry("provider_package", || async {
            let mut pkg: ProviderPackage = self.get_json(&url).await?;
            if pkg.protocols.is_empty() {
                pkg.protocols = vec!["5.0".to_string()];
            }
            Ok(pkg)
        })
        .await
    }

    pub async fn module_versions(&self, namespace: &str, name: &str, system: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/v1/modules/{namespace}/{name}/{system}/versions",
            self.config.module_registry_base
        );
        self.with_retry("module_versions", || async {
            let doc: ModuleVersionsDoc = self.get_json(&url).await?;
            Ok(doc
                .modules
                .into_iter()
                .flat_map(|m| m.versions.into_iter().map(|v| v.version))
                .collect())
        })
        .await
    }

    /// Resolve the `X-Terraform-Get`-style indirection for a module
    /// download, following one level of redirect.
    pub async fn module_download_location(
        &self,
        namespace: &str,
        name: &str,
        system: &str,
        version: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/v1/modules/{namespace}/{name}/{system}/{version}/download",
            self.config.module_registry_base
        );
        self.with_retry("module_download_location", || async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
            let status = response.status();

            if let Some(location) = response.headers().get("X-Terraform-Get") {
                let location = location
                    .to_str()
                    .map_err(|e| UpstreamError::Parse(e.to_string()))?
                    .to_string();
                return Ok(location);
            }

            if status.is_redirection() {
                if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                    return Ok(location
                        .to_str()
                        .map_err(|e| UpstreamError::Parse(e.to_string()))?
                        .to_string());
                }
            }

            if !status.is_success() {
                return Err(Self::classify_status(status));
            }

            let pkg: ModulePackage = response.json().await.map_err(|e| UpstreamError::Parse(e.to_string()))?;
            Ok(pkg.download_url)
        })
        .await
    }

    /// Stream-fetch `url`, enforcing `max_download_size` both from
    /// `Content-Length` (fail fast) and from the accumulated byte count
    /// (in case the header is absent or wrong).
    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        self.with_retry("fetch_bytes", || self.fetch_bytes_once(url)).await
    }

    async fn fetch_bytes_once(&self, url: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        if let Some(len) = response.content_length() {
            if len > self.config.max_download_size {
                return Err(UpstreamError::TooLarge);
            }
        }

        use futures_util::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpstreamError::Network(e.to_string()))?;
            buf.extend_from_slice(&chunk);
            if buf.len() as u64 > self.config.max_download_size {
                return Err(UpstreamError::TooLarge);
            }
        }

        debug!(url, size = buf.len(), "upstream fetch completed");
        Ok(Bytes::from(buf))
    }
}
