//! Speaks the upstream registry's version-list and download protocols:
//! provider package descriptors, module download indirection, and
//! streaming fetch with a size cap.

mod client;
mod types;

pub use client::{UpstreamClient, UpstreamClientConfig};
pub use types::{ModulePackage, ProviderPackage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned {0}")]
    Status(u16),

    #[error("not found")]
    NotFound,

    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    #[error("download exceeded the configured size limit")]
    TooLarge,
}

impl UpstreamError {
    /// `upstream_5xx` and transport failures are worth retrying;
    /// `upstream_4xx`, `not_found`, and `parse` are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Network(_) => true,
            UpstreamError::Status(code) => *code >= 500,
            UpstreamError::NotFound | UpstreamError::Parse(_) | UpstreamError::TooLarge => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
