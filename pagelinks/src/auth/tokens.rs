//! Access and refresh token issuance and verification.
//!
//! Tokens are HS256 JWTs. Access and refresh tokens are signed with distinct
//! secrets and carry a `typ` claim, so one kind is never accepted as the other.
//! Nothing is stored server-side: a token is valid if its signature, expiry,
//! issuer, audience and kind check out.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Token kind, carried in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User ID (subject)
    pub sub: String,
    pub typ: TokenKind,
    pub iss: String,
    pub aud: String,
    /// Expiration timestamp (Unix seconds)
    pub exp: u64,
    /// Issued at timestamp (Unix seconds)
    pub iat: u64,
}

/// Token errors.
///
/// Every verification failure maps to [`TokenError::Unauthorized`].
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid or expired token")]
    Unauthorized,

    #[error("Refresh token is required")]
    MissingToken,

    #[error("Token generation failed: {0}")]
    Generation(String),
}

/// Token configuration.
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime in seconds (default: 3600 = 1 hour)
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds (default: 604800 = 7 days)
    pub refresh_expiration_secs: u64,
}

impl TokenConfig {
    pub const DEFAULT_ISSUER: &'static str = "pagelinks";
    pub const DEFAULT_AUDIENCE: &'static str = "pagelinks-api";

    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            issuer: Self::DEFAULT_ISSUER.to_string(),
            audience: Self::DEFAULT_AUDIENCE.to_string(),
            access_expiration_secs: 3600,
            refresh_expiration_secs: 604800,
        }
    }

    /// Create TokenConfig from environment variables.
    ///
    /// Environment variables:
    /// - `JWT_SECRET`: access token secret (required)
    /// - `JWT_REFRESH_SECRET`: refresh token secret (derived from `JWT_SECRET` when unset)
    /// - `JWT_ISSUER`, `JWT_AUDIENCE`
    /// - `ACCESS_TOKEN_EXPIRATION_SECS` (default: 3600)
    /// - `REFRESH_TOKEN_EXPIRATION_SECS` (default: 604800)
    pub fn from_env() -> crate::Result<Self> {
        let access_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| crate::Error::config("JWT_SECRET must be set"))?;

        let refresh_secret = match std::env::var("JWT_REFRESH_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JWT_REFRESH_SECRET not set; deriving it from JWT_SECRET");
                format!("{}:refresh", access_secret)
            }
        };

        let mut config = Self::new(access_secret, refresh_secret);
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("JWT_AUDIENCE") {
            config.audience = audience;
        }
        config.access_expiration_secs = std::env::var("ACCESS_TOKEN_EXPIRATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.access_expiration_secs);
        config.refresh_expiration_secs = std::env::var("REFRESH_TOKEN_EXPIRATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.refresh_expiration_secs);

        Ok(config)
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_expiration_secs", &self.access_expiration_secs)
            .field("refresh_expiration_secs", &self.refresh_expiration_secs)
            .finish_non_exhaustive()
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Response of a successful refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedAccessToken {
    pub access_token: String,
    /// Lifetime of the new access token in seconds.
    pub expires_in: u64,
}

#[derive(Clone)]
struct SigningKey {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: u64,
}

impl SigningKey {
    fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs,
        }
    }
}

/// Issues and verifies access and refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    access: SigningKey,
    refresh: SigningKey,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        info!(
            "Token service initialized (issuer: {}, audience: {}, access: {}s, refresh: {}s)",
            config.issuer,
            config.audience,
            config.access_expiration_secs,
            config.refresh_expiration_secs
        );
        Self {
            access: SigningKey::new(&config.access_secret, config.access_expiration_secs),
            refresh: SigningKey::new(&config.refresh_secret, config.refresh_expiration_secs),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Issue a token of `kind` as if it had been issued at `issued_at` (Unix seconds).
    pub fn issue_token_at(
        &self,
        kind: TokenKind,
        user_id: i64,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let key = self.key(kind);
        let claims = Claims {
            sub: user_id.to_string(),
            typ: kind,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: issued_at.saturating_add(key.expiration_secs),
            iat: issued_at,
        };

        encode(&Header::default(), &claims, &key.encoding_key)
            .map_err(|e| TokenError::Generation(e.to_string()))
    }

    fn issue(&self, kind: TokenKind, user_id: i64) -> Result<String, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TokenError::Generation(e.to_string()))?
            .as_secs();
        self.issue_token_at(kind, user_id, now)
    }

    pub fn issue_access_token(&self, user_id: i64) -> Result<String, TokenError> {
        self.issue(TokenKind::Access, user_id)
    }

    pub fn issue_refresh_token(&self, user_id: i64) -> Result<String, TokenError> {
        self.issue(TokenKind::Refresh, user_id)
    }

    pub fn issue_pair(&self, user_id: i64) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user_id)?,
            refresh_token: self.issue_refresh_token(user_id)?,
        })
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Result<i64, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let claims = decode::<Claims>(token, &self.key(kind).decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(?kind, "Token rejected: {}", e);
                TokenError::Unauthorized
            })?;

        if claims.typ != kind {
            debug!(expected = ?kind, actual = ?claims.typ, "Token rejected: wrong kind");
            return Err(TokenError::Unauthorized);
        }

        claims.sub.parse().map_err(|_| TokenError::Unauthorized)
    }

    /// Verify an access token and return the user id it was issued for.
    pub fn verify_access_token(&self, token: &str) -> Result<i64, TokenError> {
        self.verify(TokenKind::Access, token)
    }

    /// Verify a refresh token and return the user id it was issued for.
    pub fn verify_refresh_token(&self, token: &str) -> Result<i64, TokenError> {
        self.verify(TokenKind::Refresh, token)
    }

    /// Exchange a refresh token for a new access token. The refresh token is
    /// not rotated and stays valid until it expires.
    pub fn refresh_access_token(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<RefreshedAccessToken, TokenError> {
        let token = refresh_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingToken)?;

        let user_id = self.verify_refresh_token(token)?;
        Ok(RefreshedAccessToken {
            access_token: self.issue_access_token(user_id)?,
            expires_in: self.access.expiration_secs,
        })
    }

    pub fn access_expiration_secs(&self) -> u64 {
        self.access.expiration_secs
    }

    pub fn refresh_expiration_secs(&self) -> u64 {
        self.refresh.expiration_secs
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_expiration_secs", &self.access.expiration_secs)
            .field("refresh_expiration_secs", &self.refresh.expiration_secs)
            .finish()
    }
}
