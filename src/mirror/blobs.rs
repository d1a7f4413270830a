//! Serves blobs directly for the local object store backend. Reached
//! only via a presigned URL produced by `objectstore::local::sign`; the
//! HMAC signature and expiry are re-checked here before any byte leaves
//! the process.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::Deserialize;

use crate::objectstore::verify_blob_url;

use super::error::MirrorError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    expires: u64,
    sig: String,
}

pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<impl IntoResponse, MirrorError> {
    if !verify_blob_url(state.blob_signing_secret.as_bytes(), &key, query.expires, &query.sig) {
        return Err(MirrorError::Unauthenticated);
    }

    let bytes: Bytes = state.store.get(&key).await?;
    Ok(([("content-type", "application/octet-stream")], bytes))
}
