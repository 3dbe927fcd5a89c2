//! Console session tokens.
//!
//! Operators authenticate once with storage credentials; afterwards every
//! request carries a signed, expiring bearer token whose subject is the
//! server-side session id.  Two token kinds are issued:
//! - a **session** token, short-lived, accepted on every protected route
//! - a **refresh** token, long-lived, only accepted by `/auth/refresh`
//!
//! Tokens are HS256 JWTs.  Verification distinguishes an expired token from
//! a malformed or forged one so the HTTP layer can answer 401 vs 403.

use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::AuthConfig;

// ── Token types ─────────────────────────────────────────────────────

/// Which of the two issued tokens a JWT is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Refresh,
}

/// Claims carried by every console token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Session id.
    pub sub: String,
    pub kind: TokenKind,
    /// Unique token id.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly issued session/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
    /// Session token lifetime in seconds.
    pub expires_in: u64,
}

/// Why a bearer token was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("Token cannot be used here")]
    WrongKind,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

// ── Issuer ──────────────────────────────────────────────────────────

/// Signs and verifies console tokens with a process-held HMAC secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], session_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            session_ttl,
            refresh_ttl,
        }
    }

    /// Build from configuration.  An empty `jwt_secret` gets a random
    /// per-process secret, so tokens do not survive a restart.
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = if config.jwt_secret.is_empty() {
            warn!("auth.jwt_secret is not set; using a random per-process secret");
            rand::random::<[u8; 32]>().to_vec()
        } else {
            config.jwt_secret.as_bytes().to_vec()
        };
        Self::new(&secret, config.session_token_ttl(), config.refresh_token_ttl())
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Issue one token of `kind` for `session_id`.
    pub fn issue(&self, session_id: &str, kind: TokenKind) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Session => self.session_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let now = chrono::Utc::now().timestamp();
        self.sign(&Claims {
            sub: session_id.to_string(),
            kind,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        })
    }

    /// Issue a session token and a refresh token for `session_id`.
    pub fn issue_pair(&self, session_id: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            token: self.issue(session_id, TokenKind::Session)?,
            refresh_token: self.issue(session_id, TokenKind::Refresh)?,
            expires_in: self.session_ttl.as_secs(),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    /// Verify a token and require it to be of `kind`.
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Mask an access key for display and logs: first and last four characters
/// kept, the rest hidden.  Short keys are hidden entirely.
pub fn mask_access_key(access_key: &str) -> String {
    let chars: Vec<char> = access_key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

// ── Tests ───────────────────────────────────────────────────────────
