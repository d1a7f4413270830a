use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::autodownload::AdmissionError;
use crate::metastore::StoreError;
use crate::pipeline::PipelineError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Unified error type for every mirror and admin handler. Maps to the
/// wire statuses in the external-interfaces error-signalling table.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("{0}")]
    NotFound(String),
    #[error("rate limited")]
    RateLimited,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    fn code(&self) -> &'static str {
        match self {
            MirrorError::InvalidInput(_) => "invalid_input",
            MirrorError::Unauthenticated => "unauthenticated",
            MirrorError::NotFound(_) => "not_found",
            MirrorError::RateLimited => "rate_limited",
            MirrorError::Upstream(_) => "upstream_error",
            MirrorError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            MirrorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MirrorError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MirrorError::NotFound(_) => StatusCode::NOT_FOUND,
            MirrorError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            MirrorError::Upstream(_) => StatusCode::BAD_GATEWAY,
            MirrorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for MirrorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => MirrorError::NotFound(m),
            other => MirrorError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for MirrorError {
    fn from(e: PipelineError) -> Self {
        match &e {
            PipelineError::Upstream(_) => MirrorError::Upstream(e.to_string()),
            PipelineError::Verify(_) | PipelineError::Rewrite(_) => MirrorError::InvalidInput(e.to_string()),
            PipelineError::Storage(_) | PipelineError::Metadata(_) => MirrorError::Internal(e.to_string()),
        }
    }
}

impl From<AdmissionError> for MirrorError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::Disabled | AdmissionError::NamespaceBlocked(_) => MirrorError::NotFound(e.to_string()),
            AdmissionError::RateLimited => MirrorError::RateLimited,
            AdmissionError::Pipeline(p) => p.into(),
        }
    }
}

impl From<AuthError> for MirrorError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::Revoked => MirrorError::Unauthenticated,
            AuthError::Store(s) => s.into(),
        }
    }
}

impl From<crate::objectstore::StoreError> for MirrorError {
    fn from(e: crate::objectstore::StoreError) -> Self {
        match e {
            crate::objectstore::StoreError::NotFound(m) => MirrorError::NotFound(m),
            other => MirrorError::Internal(other.to_string()),
        }
    }
}
