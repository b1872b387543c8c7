//! Locally held credentials.

use parking_lot::RwLock;

use crate::models::{AuthResponse, User};

/// Tokens of a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Option<User>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user: None,
        }
    }
}

impl From<AuthResponse> for Session {
    fn from(response: AuthResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user: Some(response.user),
        }
    }
}

/// Thread-safe slot for the current session.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn get(&self) -> Option<Session> {
        self.inner.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|s| s.refresh_token.clone())
    }

    pub fn set(&self, session: Session) {
        *self.inner.write() = Some(session);
    }

    /// Replace the access token, keeping the refresh token.
    ///
    /// Does nothing when the session was cleared in the meantime.
    pub fn update_access_token(&self, access_token: String) -> bool {
        match self.inner.write().as_mut() {
            Some(session) => {
                session.access_token = access_token;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}
