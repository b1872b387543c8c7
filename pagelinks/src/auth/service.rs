//! User registration and login.

use std::sync::Arc;

use argon2::{
    Argon2, Params,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::tokens::{RefreshedAccessToken, TokenError, TokenService};
use crate::database::models::UserInfo;
use crate::database::repositories::UserRepository;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Minimum password length (default: 6)
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            min_password_length: 6,
        }
    }
}

impl AuthConfig {
    /// Create AuthConfig from environment variables.
    ///
    /// - `MIN_PASSWORD_LENGTH`: Minimum password length (default: 6)
    pub fn from_env() -> Self {
        let min_password_length = std::env::var("MIN_PASSWORD_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(6);

        Self {
            min_password_length,
        }
    }
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("User already exists")]
    UserExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::Error> for AuthError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Conflict(_) => Self::UserExists,
            other => Self::Database(other.to_string()),
        }
    }
}

/// Response of a successful register or login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserInfo,
    pub access_token: String,
    pub refresh_token: String,
}

/// Registration, login and token refresh.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: Arc<TokenService>, config: AuthConfig) -> Self {
        Self {
            users,
            tokens,
            config,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Register a new user and issue its first token pair.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::WeakPassword(self.config.min_password_length));
        }

        if self.users.find_by_email(email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let password_hash = Self::hash_password(password)?;
        // A concurrent registration can still win the race; the unique index reports it.
        let user = self.users.create_user(email, &password_hash).await?;
        info!(user_id = user.id, "Registered user");

        let pair = self.tokens.issue_pair(user.id)?;
        Ok(AuthResponse {
            user: UserInfo::from(&user),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// Authenticate a user by email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let Some(user) = self.users.find_by_email(email).await? else {
            debug!("Login failed: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !Self::verify_password(password, &user.password_hash)? {
            debug!(user_id = user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.tokens.issue_pair(user.id)?;
        debug!(user_id = user.id, "User logged in");
        Ok(AuthResponse {
            user: UserInfo::from(&user),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshedAccessToken, AuthError> {
        Ok(self.tokens.refresh_access_token(refresh_token)?)
    }

    /// Hash a password with Argon2id.
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        // OWASP recommended parameters: m=19456 (19 MiB), t=2, p=1
        let params = Params::new(19456, 2, 1, None)
            .map_err(|e| AuthError::Internal(format!("Invalid Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a stored hash.
    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("Invalid password hash format: {}", e)))?;

        // Parameters are read from the hash itself.
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
