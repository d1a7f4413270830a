//! Operator session issuance and bearer validation: a signed JWT whose
//! `sid` claim is mirrored in a `sessions` row, so a still-unexpired
//! token can be invalidated early via `RevokeSession`.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metastore::{MetaStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token is malformed or expired")]
    InvalidToken,

    #[error("session has been revoked")]
    Revoked,

    #[error("metadata error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    exp: i64,
}

pub struct IssuedSession {
    pub token: String,
    pub session_id: String,
    pub expires_at: String,
}

#[derive(Clone)]
pub struct Auth {
    meta: MetaStore,
    jwt_secret: String,
    admin_username: String,
    admin_password_hash: String,
    session_ttl: std::time::Duration,
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input.as_bytes()))
}

impl Auth {
    pub fn new(
        meta: MetaStore,
        jwt_secret: String,
        admin_username: String,
        admin_password_hash: String,
        session_ttl: std::time::Duration,
    ) -> Self {
        Self {
            meta,
            jwt_secret,
            admin_username,
            admin_password_hash,
            session_ttl,
        }
    }

    /// Verify username/password against the configured operator account
    /// and issue a session. The only accepted credential is the single
    /// configured admin identity — there is no multi-user directory.
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedSession> {
        if username != self.admin_username || sha256_hex(password) != self.admin_password_hash {
            return Err(AuthError::InvalidCredentials);
        }
        self.issue_session(username).await
    }

    pub async fn issue_session(&self, subject: &str) -> Result<IssuedSession> {
        let session = self.meta.issue_session(subject, self.session_ttl).await?;
        let exp = Utc::now() + chrono::Duration::from_std(self.session_ttl).unwrap_or_default();
        let claims = Claims {
            sub: subject.to_string(),
            sid: session.id.clone(),
            exp: exp.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(IssuedSession {
            token,
            session_id: session.id,
            expires_at: session.expires_at,
        })
    }

    /// Validate a bearer token's signature and expiry, then confirm the
    /// referenced session row is still unrevoked. Returns the subject.
    pub async fn validate_bearer(&self, token: &str) -> Result<String> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        let session = self
            .meta
            .get_session(&decoded.claims.sid)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if session.revoked {
            return Err(AuthError::Revoked);
        }

        Ok(decoded.claims.sub)
    }

    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        self.meta.revoke_session(session_id).await?;
        Ok(())
    }

    /// Extract the session id claim without validating revocation, for
    /// logout (which needs the id to revoke, not a pass/fail check).
    pub fn session_id_of(&self, token: &str) -> Result<String> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;
        Ok(decoded.claims.sid)
    }
}
