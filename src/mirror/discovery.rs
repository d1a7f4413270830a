//! Service discovery and the primary provider network-mirror protocol:
//! `/.well-known/{tool}.json`, `/{hostname}/{ns}/{type}/index.json`,
//! `/{hostname}/{ns}/{type}/{version}.json`.

use axum::extract::{Path, State};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::cache::fingerprint;
use crate::metastore::ProviderIdentity;

use super::error::MirrorError;
use super::state::AppState;

pub async fn well_known(State(_state): State<AppState>, Path(_tool): Path<String>) -> Json<Value> {
    Json(json!({
        "providers.v1": "/v1/providers/",
        "modules.v1": "/v1/modules/",
    }))
}

/// `GET /{hostname}/{ns}/{type}/index.json`
pub async fn provider_index(
    State(state): State<AppState>,
    Path((hostname, namespace, kind)): Path<(String, String, String)>,
) -> Result<Json<Value>, MirrorError> {
    let key = fingerprint(&["provider-index", &hostname, &namespace, &kind]);

    if let (Some(bytes), true) = state.cache.get(&key) {
        state.metrics.cache_hit();
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| MirrorError::Internal(e.to_string()))?;
        return Ok(Json(value));
    }
    state.metrics.cache_miss();

    let versions = state.meta.list_provider_versions(&namespace, &kind).await?;
    if !versions.is_empty() {
        let body = versions_body(&versions);
        cache_and_return(&state, &key, &body).await
    } else if let Some(versions) = upstream_listing_fallback(&state, &namespace, &kind).await {
        Ok(Json(versions_body(&versions)))
    } else {
        Err(MirrorError::NotFound(format!("{namespace}/{kind} not found")))
    }
}

/// `GET /{hostname}/{ns}/{type}/{version}.json`
pub async fn provider_version_archives(
    State(state): State<AppState>,
    Path((hostname, namespace, kind, version)): Path<(String, String, String, String)>,
) -> Result<Json<Value>, MirrorError> {
    let key = fingerprint(&["provider-archives", &hostname, &namespace, &kind, &version]);
    if let (Some(bytes), true) = state.cache.get(&key) {
        state.metrics.cache_hit();
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| MirrorError::Internal(e.to_string()))?;
        return Ok(Json(value));
    }
    state.metrics.cache_miss();

    let mut archives = serde_json::Map::new();

    for platform_str in state.autodownload.platforms().to_vec() {
        let Some((os, arch)) = platform_str.split_once('_') else {
            continue;
        };
        let identity = ProviderIdentity {
            namespace: namespace.clone(),
            kind: kind.clone(),
            version: version.clone(),
            platform: platform_str.clone(),
        };

        let provider = match state.meta.get_provider_by_identity(&identity).await? {
            Some(p) => Some(p),
            None => state.autodownload.admit_provider(&identity).await.ok(),
        };

        let Some(provider) = provider else { continue };
        let url = state.pipeline.presign(&provider.storage_key).await?;
        archives.insert(
            format!("{os}_{arch}"),
            json!({
                "url": url,
                "hashes": [format!("zh:{}", provider.shasum)],
            }),
        );
    }

    if archives.is_empty() {
        return Err(MirrorError::NotFound(format!("{namespace}/{kind}/{version} not found")));
    }

    let body = json!({ "archives": Value::Object(archives) });
    cache_and_return(&state, &key, &body).await
}

fn versions_body(versions: &[String]) -> Value {
    let mut map = serde_json::Map::new();
    for v in versions {
        map.insert(v.clone(), json!({}));
    }
    json!({ "versions": Value::Object(map) })
}

/// Listing alone never materialises artifacts: it only asks upstream
/// directly when MetaStore has nothing recorded yet, and never writes.
async fn upstream_listing_fallback(state: &AppState, namespace: &str, kind: &str) -> Option<Vec<String>> {
    if !state.autodownload.enabled() {
        return None;
    }
    let versions = state.upstream.provider_versions(namespace, kind).await.ok()?;
    if versions.is_empty() {
        None
    } else {
        Some(versions)
    }
}

async fn cache_and_return(state: &AppState, key: &str, body: &Value) -> Result<Json<Value>, MirrorError> {
    let bytes = serde_json::to_vec(body).map_err(|e| MirrorError::Internal(e.to_string()))?;
    state.cache.set(key, Bytes::from(bytes), None);
    Ok(Json(body.clone()))
}
