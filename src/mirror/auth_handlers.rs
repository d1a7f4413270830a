use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::error::MirrorError;
use super::middleware::bearer_token;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let session = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(json!({
        "token": session.token,
        "expires_at": session.expires_at,
    })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, MirrorError> {
    let token = bearer_token(&headers).ok_or(MirrorError::Unauthenticated)?;
    let session_id = state.auth.session_id_of(token)?;
    state.auth.revoke_session(&session_id).await?;
    Ok(Json(json!({"status": "logged_out"})))
}
