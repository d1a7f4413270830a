//! Bearer-auth gate for every `/admin/*` route other than `/admin/login`.
//! On success the authenticated subject is inserted as a request
//! extension so downstream handlers can attribute audit records to it.

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use super::error::MirrorError;
use super::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, MirrorError> {
    let token = bearer_token(request.headers()).ok_or(MirrorError::Unauthenticated)?;
    let subject = state.auth.validate_bearer(token).await?;
    request.extensions_mut().insert(subject);
    Ok(next.run(request).await)
}
